use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use hostnet_api::{Network, NetworkAttachment};
use hostnet_core::{resolve_node_name, ReconcileMetrics};
use hostnet_netlink::HostNetwork;
use kube::{Client, CustomResourceExt};
use kube_runtime::controller::Action;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod attachment_controller;
mod config;
mod error;
mod metrics_server;
mod migration_controller;
mod network_controller;

use attachment_controller::{AttachmentClientImpl, AttachmentContext};
use config::{Cli, LogFormat};
use error::ReconcileError;
use migration_controller::{MigrationContext, NetworkLookupImpl};
use network_controller::{NetworkClientImpl, NetworkContext};

/// Periodic requeue after a successful reconcile
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue decision shared by the controllers' error policies
pub fn error_policy_action(controller: &str, name: &str, error: &ReconcileError) -> Action {
    if error.is_conflict() {
        debug!(controller, object = %name, "Conflict, retrying: {}", error);
        return Action::requeue(CONFLICT_REQUEUE);
    }
    error!(controller, object = %name, "Reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_crds() -> Result<()> {
    print!("{}", serde_yaml::to_string(&Network::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&NetworkAttachment::crd())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        return print_crds();
    }

    init_tracing(cli.log_format);

    let node_name = resolve_node_name(cli.node_name.as_deref())?;
    info!(node = %node_name, "Starting hostnet-controller...");

    let client = Client::try_default().await?;
    let metrics = ReconcileMetrics::new()?;
    let host = Arc::new(HostNetwork::new(cli.virtual_ip_address)?);
    info!(virtual_ip = %cli.virtual_ip_address, "Host network initialized");

    let network_ctx = Arc::new(NetworkContext {
        client: Arc::new(NetworkClientImpl::new(client.clone())),
        node_name: node_name.clone(),
        metrics: metrics.clone(),
    });
    let mut tasks = JoinSet::new();
    let network_client = client.clone();
    tasks.spawn(async move {
        ("network controller", network_controller::run(network_client, network_ctx).await)
    });

    let attachment_ctx = Arc::new(AttachmentContext {
        client: Arc::new(AttachmentClientImpl::new(client.clone())),
        applier: host.clone(),
        node_name: node_name.clone(),
        metrics: metrics.clone(),
    });
    let attachment_client = client.clone();
    tasks.spawn(async move {
        (
            "attachment controller",
            attachment_controller::run(attachment_client, attachment_ctx).await,
        )
    });

    if cli.watch_kubevirt_migration {
        let migration_ctx = Arc::new(MigrationContext {
            networks: Arc::new(NetworkLookupImpl::new(client.clone())),
            announcer: host.clone(),
            node_name: node_name.clone(),
            metrics: metrics.clone(),
        });
        let migration_client = client.clone();
        tasks.spawn(async move {
            (
                "migration watcher",
                migration_controller::run(migration_client, migration_ctx).await,
            )
        });
    }

    let metrics_addr = cli.metrics_addr;
    tasks.spawn(async move {
        (
            "metrics server",
            metrics_server::serve(metrics_addr, metrics).await,
        )
    });

    supervise(tasks, tokio::signal::ctrl_c()).await
}

/// Waits for shutdown or for the first task to stop. Every task is expected to
/// run for the life of the process, so any exit is fatal.
async fn supervise<F>(mut tasks: JoinSet<(&'static str, Result<()>)>, shutdown: F) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        res = shutdown => {
            res?;
            info!("Shutdown signal received, exiting...");
            tasks.abort_all();
            Ok(())
        }
        Some(joined) = tasks.join_next() => {
            tasks.abort_all();
            match joined {
                Ok((name, Ok(()))) => {
                    error!(task = name, "Task exited");
                    Err(anyhow!("{} exited", name))
                }
                Ok((name, Err(e))) => {
                    error!(task = name, "Task failed: {}", e);
                    Err(e.context(format!("{} failed", name)))
                }
                Err(e) => {
                    error!("Task panicked: {}", e);
                    Err(anyhow!("task panicked: {}", e))
                }
            }
        }
    }
}
