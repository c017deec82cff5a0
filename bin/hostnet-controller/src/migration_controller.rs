//! KubeVirt live-migration watcher
//!
//! Switches upstream learn the floating gateway address on the node that
//! announced it last. Once a VM lands on this node its masqueraded
//! networks are re-announced here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use hostnet_api::kubevirt::VirtualMachineInstance;
use hostnet_api::Network;
use hostnet_core::ReconcileMetrics;
use hostnet_netlink::{HostNetwork, NetError};
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::ReconcileError;

/// A VMI whose last migration just finished successfully
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationCompleted {
    pub namespace: String,
    pub name: String,
    pub target_node: String,
    pub networks: Vec<String>,
}

impl MigrationCompleted {
    fn from_vmi(vmi: &VirtualMachineInstance) -> Option<Self> {
        Some(Self {
            namespace: vmi.namespace()?,
            name: vmi.name_any(),
            target_node: vmi.migration_target()?.to_string(),
            networks: vmi.multus_networks(),
        })
    }
}

/// Last seen migration outcome per VMI uid
#[derive(Debug, Default)]
pub struct MigrationTracker {
    succeeded: HashMap<String, bool>,
}

impl MigrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one watch event; returns a completion only on a fresh transition
    pub fn observe(&mut self, event: Event<VirtualMachineInstance>) -> Option<MigrationCompleted> {
        match event {
            Event::Init => {
                self.succeeded.clear();
                None
            }
            Event::InitApply(vmi) => {
                if let Some(uid) = vmi.uid() {
                    self.succeeded.insert(uid, vmi.migration_succeeded());
                }
                None
            }
            Event::InitDone => None,
            Event::Apply(vmi) => {
                let uid = vmi.uid()?;
                let now = vmi.migration_succeeded();
                let before = self.succeeded.insert(uid, now).unwrap_or(false);
                if now && !before {
                    MigrationCompleted::from_vmi(&vmi)
                } else {
                    None
                }
            }
            Event::Delete(vmi) => {
                if let Some(uid) = vmi.uid() {
                    self.succeeded.remove(&uid);
                }
                None
            }
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    async fn get_network(&self, namespace: &str, name: &str)
        -> Result<Option<Network>, ReconcileError>;
}

pub struct NetworkLookupImpl {
    client: Client,
}

impl NetworkLookupImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkLookup for NetworkLookupImpl {
    async fn get_network(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Network>, ReconcileError> {
        let api: Api<Network> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Gratuitous ARP for the floating gateway address on `device`
    async fn announce(&self, device: &str) -> Result<(), NetError>;
}

#[async_trait]
impl Announcer for HostNetwork {
    async fn announce(&self, device: &str) -> Result<(), NetError> {
        HostNetwork::announce(self, device).await
    }
}

pub struct MigrationContext {
    pub networks: Arc<dyn NetworkLookup>,
    pub announcer: Arc<dyn Announcer>,
    pub node_name: String,
    pub metrics: ReconcileMetrics,
}

/// Split `namespace/name`, defaulting to the VMI namespace
fn network_ref<'a>(reference: &'a str, default_namespace: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => (default_namespace, reference),
    }
}

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(60);

/// Backoff before the `attempt`-th retry of a failed announcement
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX)
}

/// Announce the masqueraded networks of a migration that landed here
///
/// Returns the same event narrowed to the networks that failed, if any.
#[instrument(skip(event, ctx), fields(vmi = %event.name, namespace = %event.namespace))]
pub async fn handle_completed(
    event: &MigrationCompleted,
    ctx: &MigrationContext,
) -> Option<MigrationCompleted> {
    if event.target_node != ctx.node_name {
        debug!(target_node = %event.target_node, "Migration landed elsewhere");
        return None;
    }

    let mut failed = Vec::new();
    for reference in &event.networks {
        let (namespace, name) = network_ref(reference, &event.namespace);
        if let Err(e) = announce_network(namespace, name, ctx).await {
            error!(network = %reference, "Failed to refresh gateway after migration: {}", e);
            ctx.metrics
                .reconcile_failures_total
                .with_label_values(&["migration"])
                .inc();
            failed.push(reference.clone());
        }
    }

    if failed.is_empty() {
        return None;
    }
    Some(MigrationCompleted {
        networks: failed,
        ..event.clone()
    })
}

/// Handle `event` and schedule whatever failed for another attempt
async fn process(
    event: MigrationCompleted,
    attempt: u32,
    ctx: &MigrationContext,
    retries: &mpsc::UnboundedSender<(MigrationCompleted, u32)>,
) {
    let Some(failed) = handle_completed(&event, ctx).await else {
        return;
    };

    let delay = retry_delay(attempt);
    warn!(vmi = %failed.name, networks = ?failed.networks, attempt, "Retrying announcement in {:?}", delay);
    let retries = retries.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // Receiver only goes away with the watcher itself
        let _ = retries.send((failed, attempt + 1));
    });
}

async fn announce_network(
    namespace: &str,
    name: &str,
    ctx: &MigrationContext,
) -> Result<(), ReconcileError> {
    let Some(network) = ctx.networks.get_network(namespace, name).await? else {
        warn!(network = %name, %namespace, "Network not found, skipping");
        return Ok(());
    };

    let masq = &network.spec.ip_masq;
    if !masq.enabled || masq.bridge.is_empty() {
        return Ok(());
    }

    ctx.announcer.announce(&masq.bridge).await?;
    ctx.metrics.gratuitous_arps_total.inc();
    info!(network = %name, device = %masq.bridge, "Gateway re-announced after migration");
    Ok(())
}

pub async fn run(client: Client, ctx: Arc<MigrationContext>) -> anyhow::Result<()> {
    info!("Starting VirtualMachineInstance migration watcher");

    let vmis: Api<VirtualMachineInstance> = Api::all(client);
    let stream = watcher(vmis, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel();
    let mut tracker = MigrationTracker::new();
    loop {
        tokio::select! {
            item = stream.try_next() => match item {
                Ok(Some(event)) => {
                    if let Some(completed) = tracker.observe(event) {
                        process(completed, 0, &ctx, &retry_tx).await;
                    }
                }
                Ok(None) => break,
                Err(e) => warn!("VirtualMachineInstance watch error: {}", e),
            },
            Some((event, attempt)) = retry_rx.recv() => {
                process(event, attempt, &ctx, &retry_tx).await;
            }
        }
    }

    Ok(())
}
