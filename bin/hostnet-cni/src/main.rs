//! hostnet CNI plugin
//!
//! Configures the host side of one network: bridge, VLAN port, routes and
//! masquerade. DEL and CHECK succeed without touching the host.

mod config;
mod error;
mod result;

use std::env;
use std::io::{self, Read};

use hostnet_netlink::bridge::{ensure_bridge, ensure_port};
use hostnet_netlink::{add_route, HostNetwork, DEFAULT_VIRTUAL_IP};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::NetConf;
use error::{CniError, CniErrorCode};
use result::{CniResult, VersionResult};

const MAX_INPUT_SIZE: u64 = 1024 * 1024;

const CNI_VERSION: &str = "1.0.0";

const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

fn main() {
    // stdout carries the CNI result
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        let doc = e.to_document(CNI_VERSION);
        match serde_json::to_string(&doc) {
            Ok(json) => println!("{}", json),
            Err(_) => println!(
                r#"{{"cniVersion":"{}","code":{},"msg":"{}"}}"#,
                CNI_VERSION,
                e.code() as u32,
                e.message()
            ),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<(), CniError> {
    let command = env::var("CNI_COMMAND").map_err(|_| {
        CniError::new(CniErrorCode::InvalidEnvironmentVariables, "CNI_COMMAND not set")
    })?;

    match command.as_str() {
        "ADD" => cmd_add(&read_stdin()?),
        "DEL" | "CHECK" => {
            debug!(%command, "Nothing to do");
            Ok(())
        }
        "VERSION" => cmd_version(),
        _ => {
            let safe_command: String = command
                .chars()
                .take(32)
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            Err(CniError::new(
                CniErrorCode::InvalidEnvironmentVariables,
                &format!("unknown CNI_COMMAND: {}", safe_command),
            ))
        }
    }
}

fn read_stdin() -> Result<String, CniError> {
    let mut input = String::new();
    io::stdin()
        .take(MAX_INPUT_SIZE)
        .read_to_string(&mut input)
        .map_err(|e| {
            CniError::new(CniErrorCode::IoFailure, "failed to read stdin").with_details(&e.to_string())
        })?;
    Ok(input)
}

fn parse_netconf(input: &str) -> Result<NetConf, CniError> {
    let conf: NetConf = serde_json::from_str(input).map_err(|e| {
        CniError::new(CniErrorCode::DecodingFailure, "failed to parse network config")
            .with_details(&e.to_string())
    })?;
    if conf.bridge.is_empty() || conf.interface.is_empty() {
        return Err(CniError::new(
            CniErrorCode::InvalidNetworkConfig,
            "bridge and interface are required",
        ));
    }
    Ok(conf)
}

fn cmd_add(input: &str) -> Result<(), CniError> {
    let conf = parse_netconf(input)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            CniError::new(CniErrorCode::IoFailure, "failed to start runtime").with_details(&e.to_string())
        })?;
    runtime.block_on(apply(&conf))?;

    let result = CniResult {
        cni_version: conf.cni_version.clone(),
    };
    println!(
        "{}",
        serde_json::to_string(&result).map_err(|e| {
            CniError::new(CniErrorCode::IoFailure, "failed to serialize result")
                .with_details(&e.to_string())
        })?
    );
    Ok(())
}

async fn apply(conf: &NetConf) -> Result<(), CniError> {
    let host = HostNetwork::new(DEFAULT_VIRTUAL_IP)
        .map_err(|e| CniError::net(CniErrorCode::IoFailure, "failed to open netlink", e))?;

    let bridge_spec = conf.bridge_spec();
    let bridge = ensure_bridge(host.links(), &bridge_spec)
        .await
        .map_err(|e| CniError::net(CniErrorCode::BridgeFailure, "failed to create bridge", e))?;
    for port in &bridge_spec.ports {
        ensure_port(host.links(), &bridge, bridge_spec.mtu, port)
            .await
            .map_err(|e| CniError::net(CniErrorCode::BridgeFailure, "failed to attach port", e))?;
    }

    for route in conf.route_specs() {
        add_route(host.links(), host.routes(), &route)
            .await
            .map_err(|e| CniError::net(CniErrorCode::RouteFailure, "failed to add route", e))?;
    }

    if let Some(rules) = conf.masquerade_rules() {
        host.masquerade()
            .enable(&rules)
            .await
            .map_err(|e| CniError::net(CniErrorCode::MasqueradeFailure, "failed to set up masquerade", e))?;
    }

    info!(network = %conf.name, bridge = %conf.bridge, "Host network configured");
    Ok(())
}

fn cmd_version() -> Result<(), CniError> {
    let result = VersionResult {
        cni_version: CNI_VERSION.to_string(),
        supported_versions: SUPPORTED_VERSIONS.iter().map(|s| s.to_string()).collect(),
    };

    println!(
        "{}",
        serde_json::to_string(&result).map_err(|e| {
            CniError::new(CniErrorCode::IoFailure, "failed to serialize version")
                .with_details(&e.to_string())
        })?
    );
    Ok(())
}
