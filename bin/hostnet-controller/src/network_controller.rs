//! Network controller
//!
//! Keeps this node's NetworkAttachment for each Network in line with the
//! network's spec and node selectors. Attachments for other nodes are never
//! touched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use hostnet_api::v1alpha1::NODE_LABEL;
use hostnet_api::{Network, NetworkAttachment};
use hostnet_core::{
    attachment_name, matches_any, new_attachment, sync_attachment_spec, CoreError,
    ReconcileMetrics,
};
use k8s_openapi::api::core::v1::Node;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::ReconcileError;
use crate::{error_policy_action, RESYNC_INTERVAL};

const CONTROLLER: &str = "network";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Labels of `node`, or `None` when the node is not in the listing
    async fn node_labels(&self, node: &str)
        -> Result<Option<BTreeMap<String, String>>, ReconcileError>;

    async fn get_attachment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachment>, ReconcileError>;

    async fn create_attachment(&self, attachment: &NetworkAttachment)
        -> Result<(), ReconcileError>;

    /// Replace an attachment; fails with a conflict if it changed meanwhile
    async fn replace_attachment(
        &self,
        attachment: &NetworkAttachment,
    ) -> Result<(), ReconcileError>;

    async fn delete_attachment(&self, namespace: &str, name: &str) -> Result<(), ReconcileError>;
}

pub struct NetworkClientImpl {
    client: Client,
}

impl NetworkClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn attachments(&self, namespace: &str) -> Api<NetworkAttachment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl NetworkClient for NetworkClientImpl {
    async fn node_labels(
        &self,
        node: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ReconcileError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .find(|n| n.name_any() == node)
            .map(|n| n.metadata.labels.unwrap_or_default()))
    }

    async fn get_attachment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachment>, ReconcileError> {
        Ok(self.attachments(namespace).get_opt(name).await?)
    }

    async fn create_attachment(
        &self,
        attachment: &NetworkAttachment,
    ) -> Result<(), ReconcileError> {
        let namespace = attachment
            .namespace()
            .ok_or_else(|| ReconcileError::MissingNamespace(attachment.name_any()))?;
        self.attachments(&namespace)
            .create(&PostParams::default(), attachment)
            .await?;
        Ok(())
    }

    async fn replace_attachment(
        &self,
        attachment: &NetworkAttachment,
    ) -> Result<(), ReconcileError> {
        let namespace = attachment
            .namespace()
            .ok_or_else(|| ReconcileError::MissingNamespace(attachment.name_any()))?;
        self.attachments(&namespace)
            .replace(&attachment.name_any(), &PostParams::default(), attachment)
            .await?;
        Ok(())
    }

    async fn delete_attachment(&self, namespace: &str, name: &str) -> Result<(), ReconcileError> {
        self.attachments(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

pub struct NetworkContext {
    pub client: Arc<dyn NetworkClient>,
    pub node_name: String,
    pub metrics: ReconcileMetrics,
}

/// Whether `network` should be materialized on `node`
///
/// Networks without selectors apply everywhere and need no node lookup.
async fn should_run(
    network: &Network,
    node: &str,
    client: &dyn NetworkClient,
) -> Result<bool, ReconcileError> {
    let selectors = &network.spec.node_selectors;
    if selectors.is_empty() {
        return Ok(true);
    }
    let labels = client
        .node_labels(node)
        .await?
        .ok_or_else(|| CoreError::NodeNotFound(node.to_string()))?;
    Ok(matches_any(selectors, &labels)?)
}

#[instrument(skip(network, ctx), fields(network = %network.name_any()))]
pub async fn reconcile(
    network: Arc<Network>,
    ctx: Arc<NetworkContext>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = match reconcile_network(&network, &ctx).await {
        Err(e) if e.is_not_found() => {
            debug!("Object disappeared during reconcile");
            Ok(Action::await_change())
        }
        other => other,
    };
    ctx.metrics
        .observe(CONTROLLER, started.elapsed(), result.is_err());
    result
}

async fn reconcile_network(
    network: &Network,
    ctx: &NetworkContext,
) -> Result<Action, ReconcileError> {
    if network.metadata.deletion_timestamp.is_some() {
        // Attachments go with their owner
        return Ok(Action::await_change());
    }

    let node = ctx.node_name.as_str();
    let namespace = network
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace(network.name_any()))?;
    let name = attachment_name(node, &network.name_any());

    let eligible = should_run(network, node, ctx.client.as_ref()).await?;
    let existing = ctx.client.get_attachment(&namespace, &name).await?;

    match (eligible, existing) {
        (false, Some(_)) => {
            info!(attachment = %name, "Node no longer selected, deleting attachment");
            ctx.client.delete_attachment(&namespace, &name).await?;
        }
        (false, None) => {
            debug!("Network not selected for this node");
        }
        (true, None) => {
            info!(attachment = %name, "Creating attachment");
            ctx.client
                .create_attachment(&new_attachment(node, network))
                .await?;
        }
        (true, Some(mut attachment)) => {
            if sync_attachment_spec(&network.spec, &mut attachment.spec) {
                info!(attachment = %name, "Updating attachment");
                ctx.client.replace_attachment(&attachment).await?;
            } else {
                debug!(attachment = %name, "Attachment up to date");
            }
        }
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

pub fn error_policy(
    network: Arc<Network>,
    error: &ReconcileError,
    _ctx: Arc<NetworkContext>,
) -> Action {
    error_policy_action(CONTROLLER, &network.name_any(), error)
}

pub async fn run(client: Client, ctx: Arc<NetworkContext>) -> anyhow::Result<()> {
    info!("Starting Network reconciliation");

    let networks: Api<Network> = Api::all(client.clone());
    let attachments: Api<NetworkAttachment> = Api::all(client);
    let owned = watcher::Config::default().labels(&format!("{}={}", NODE_LABEL, ctx.node_name));

    let mut stream = Controller::new(networks, watcher::Config::default())
        .owns(attachments, owned)
        .run(reconcile, error_policy, ctx)
        .boxed();

    while let Some(item) = stream.next().await {
        match item {
            Ok(_) => debug!("Reconciled Network successfully"),
            Err(e) => error!("Error in Network reconciliation stream: {}", e),
        }
    }

    Ok(())
}
