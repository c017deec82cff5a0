//! NetworkAttachment controller
//!
//! Applies this node's attachments to the host. The flow per attachment:
//! 1. install the finalizer before touching the kernel
//! 2. on deletion, tear everything down and release the finalizer
//! 3. otherwise remove what the last applied spec had and the current one
//!    dropped, apply the current spec, then record it as last applied

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use hostnet_api::v1alpha1::{ATTACHMENT_FINALIZER, LAST_APPLIED_ANNOTATION, NODE_LABEL};
use hostnet_api::{NetworkAttachment, NetworkAttachmentSpec};
use hostnet_core::{diff_specs, last_applied_spec, CoreError, ReconcileMetrics, SpecDelta};
use hostnet_netlink::{HostNetwork, NetError};
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::watcher::Event;
use kube_runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::ReconcileError;
use crate::{error_policy_action, RESYNC_INTERVAL};

const CONTROLLER: &str = "attachment";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AttachmentClient: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachment>, ReconcileError>;

    /// Replace the object, guarded by its resourceVersion
    async fn replace(
        &self,
        attachment: &NetworkAttachment,
    ) -> Result<NetworkAttachment, ReconcileError>;
}

pub struct AttachmentClientImpl {
    client: Client,
}

impl AttachmentClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttachmentClient for AttachmentClientImpl {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachment>, ReconcileError> {
        let api: Api<NetworkAttachment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace(
        &self,
        attachment: &NetworkAttachment,
    ) -> Result<NetworkAttachment, ReconcileError> {
        let namespace = attachment
            .namespace()
            .ok_or_else(|| ReconcileError::MissingNamespace(attachment.name_any()))?;
        let api: Api<NetworkAttachment> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&attachment.name_any(), &PostParams::default(), attachment)
            .await?)
    }
}

/// Host side of an attachment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkApplier: Send + Sync {
    async fn create_network(&self, spec: &NetworkAttachmentSpec) -> Result<(), NetError>;
    async fn delete_network(&self, spec: &NetworkAttachmentSpec) -> Result<(), NetError>;
    async fn cleanup(
        &self,
        prev: &NetworkAttachmentSpec,
        delta: &SpecDelta,
    ) -> Result<(), NetError>;
}

#[async_trait]
impl NetworkApplier for HostNetwork {
    async fn create_network(&self, spec: &NetworkAttachmentSpec) -> Result<(), NetError> {
        HostNetwork::create_network(self, spec).await
    }

    async fn delete_network(&self, spec: &NetworkAttachmentSpec) -> Result<(), NetError> {
        HostNetwork::delete_network(self, spec).await
    }

    async fn cleanup(
        &self,
        prev: &NetworkAttachmentSpec,
        delta: &SpecDelta,
    ) -> Result<(), NetError> {
        HostNetwork::cleanup(self, prev, delta).await
    }
}

pub struct AttachmentContext {
    pub client: Arc<dyn AttachmentClient>,
    pub applier: Arc<dyn NetworkApplier>,
    pub node_name: String,
    pub metrics: ReconcileMetrics,
}

fn has_finalizer(attachment: &NetworkAttachment) -> bool {
    attachment
        .finalizers()
        .iter()
        .any(|f| f == ATTACHMENT_FINALIZER)
}

#[instrument(skip(attachment, ctx), fields(attachment = %attachment.name_any()))]
pub async fn reconcile(
    attachment: Arc<NetworkAttachment>,
    ctx: Arc<AttachmentContext>,
) -> Result<Action, ReconcileError> {
    if attachment.spec.node_name != ctx.node_name {
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let result = match reconcile_attachment(&attachment, &ctx).await {
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

async fn reconcile_attachment(
    attachment: &NetworkAttachment,
    ctx: &AttachmentContext,
) -> Result<Action, ReconcileError> {
    let name = attachment.name_any();
    let namespace = attachment
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace(name.clone()))?;

    if attachment.metadata.deletion_timestamp.is_some() {
        if has_finalizer(attachment) {
            teardown(&namespace, &name, ctx).await?;
        }
        return Ok(Action::await_change());
    }

    let mut current = attachment.clone();
    if !has_finalizer(&current) {
        current
            .finalizers_mut()
            .push(ATTACHMENT_FINALIZER.to_string());
        current = ctx.client.replace(&current).await?;
        debug!("Finalizer installed");
    }

    if let Some(prev) = last_applied_spec(current.annotations())? {
        remove_dropped(&prev, &current.spec, ctx).await?;
    }

    ctx.applier.create_network(&current.spec).await?;
    commit(&namespace, &name, &current.spec, ctx).await?;

    info!("Attachment applied");
    Ok(Action::requeue(RESYNC_INTERVAL))
}

async fn teardown(namespace: &str, name: &str, ctx: &AttachmentContext) -> Result<(), ReconcileError> {
    let Some(mut latest) = ctx.client.get(namespace, name).await? else {
        return Ok(());
    };

    info!("Tearing down attachment");
    // Ports dropped from the spec but never cleaned up still sit on the bridge
    match last_applied_spec(latest.annotations()) {
        Ok(Some(prev)) => remove_dropped(&prev, &latest.spec, ctx).await?,
        Ok(None) => {}
        Err(e) => warn!("Ignoring last applied configuration during teardown: {}", e),
    }
    ctx.applier.delete_network(&latest.spec).await?;

    latest
        .finalizers_mut()
        .retain(|f| f != ATTACHMENT_FINALIZER);
    ctx.client.replace(&latest).await?;
    info!("Finalizer released");
    Ok(())
}

/// Remove what `prev` applied and `curr` no longer declares
async fn remove_dropped(
    prev: &NetworkAttachmentSpec,
    curr: &NetworkAttachmentSpec,
    ctx: &AttachmentContext,
) -> Result<(), ReconcileError> {
    let delta = diff_specs(prev, curr);
    if !delta.is_empty() {
        info!(ports = ?delta.ports, bridges = ?delta.bridges, "Removing dropped resources");
        ctx.applier.cleanup(prev, &delta).await?;
    }
    Ok(())
}

/// Record `applied` as the last applied spec on the latest object
async fn commit(
    namespace: &str,
    name: &str,
    applied: &NetworkAttachmentSpec,
    ctx: &AttachmentContext,
) -> Result<(), ReconcileError> {
    let serialized = serde_json::to_string(applied).map_err(CoreError::from)?;

    let Some(mut latest) = ctx.client.get(namespace, name).await? else {
        warn!("Attachment gone before commit");
        return Ok(());
    };
    if latest.annotations().get(LAST_APPLIED_ANNOTATION) == Some(&serialized) {
        return Ok(());
    }

    latest
        .annotations_mut()
        .insert(LAST_APPLIED_ANNOTATION.to_string(), serialized);
    ctx.client.replace(&latest).await?;
    debug!("Last applied configuration recorded");
    Ok(())
}

pub fn error_policy(
    attachment: Arc<NetworkAttachment>,
    error: &ReconcileError,
    _ctx: Arc<AttachmentContext>,
) -> Action {
    error_policy_action(CONTROLLER, &attachment.name_any(), error)
}

/// Attachments whose spec changed or that started deleting
///
/// Our own finalizer and annotation writes leave the generation alone and
/// are dropped here.
fn spec_changes<S>(events: S) -> impl Stream<Item = Result<NetworkAttachment, watcher::Error>>
where
    S: Stream<Item = Result<Event<NetworkAttachment>, watcher::Error>>,
{
    events
        .applied_objects()
        .predicate_filter(predicates::generation)
}

pub async fn run(client: Client, ctx: Arc<AttachmentContext>) -> anyhow::Result<()> {
    info!("Starting NetworkAttachment reconciliation");

    let attachments: Api<NetworkAttachment> = Api::all(client);
    let config = watcher::Config::default().labels(&format!("{}={}", NODE_LABEL, ctx.node_name));

    let (reader, writer) = reflector::store();
    let events = watcher(attachments, config)
        .default_backoff()
        .reflect(writer);

    let mut stream = Controller::for_stream(spec_changes(events), reader)
        .run(reconcile, error_policy, ctx)
        .boxed();

    while let Some(item) = stream.next().await {
        match item {
            Ok(_) => debug!("Reconciled NetworkAttachment successfully"),
            Err(e) => error!("Error in NetworkAttachment reconciliation stream: {}", e),
        }
    }

    Ok(())
}
