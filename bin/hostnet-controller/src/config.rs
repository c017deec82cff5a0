//! Command line and environment configuration

use std::net::{Ipv4Addr, SocketAddr};

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Per-node controller materializing hostnet Networks on the local host
#[derive(Parser, Debug, Clone)]
#[command(name = "hostnet-controller", version, about)]
pub struct Cli {
    /// Print the CustomResourceDefinitions as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Name of the node this instance manages; defaults to the hostname
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Re-announce the gateway address after KubeVirt live migrations
    #[arg(long, env = "WATCH_KUBEVIRT_MIGRATION", default_value_t = false)]
    pub watch_kubevirt_migration: bool,

    /// Floating gateway address answered by the ARP proxy
    #[arg(long, env = "VIRTUAL_IP_ADDRESS", default_value = "169.254.1.1")]
    pub virtual_ip_address: Ipv4Addr,

    /// Listen address of the metrics and health endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
