//! Network configuration read from stdin

use hostnet_api::{BridgeSpec, PortSpec, RouteSpec};
use hostnet_netlink::MasqueradeRules;
use serde::Deserialize;

fn default_mtu() -> u32 {
    1500
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    pub cni_version: String,

    /// Network name; keys the NAT chain
    pub name: String,

    pub bridge: String,

    #[serde(default = "default_mtu")]
    pub mtu: u32,

    #[serde(default)]
    pub vlan: u16,

    /// Parent interface of the VLAN port
    pub interface: String,

    #[serde(default)]
    pub ip_masq: IpMasq,

    #[serde(default)]
    pub routes: Vec<CniRoute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpMasq {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Link-scoped route on `dev`, borrowing the preferred source of `src`
#[derive(Debug, Clone, Deserialize)]
pub struct CniRoute {
    pub dev: String,
    #[serde(default)]
    pub src: String,
    pub dst: String,
}

impl NetConf {
    pub fn bridge_spec(&self) -> BridgeSpec {
        BridgeSpec {
            name: self.bridge.clone(),
            mtu: self.mtu,
            ports: vec![self.port_spec()],
        }
    }

    /// Port MTU is left to follow the bridge
    pub fn port_spec(&self) -> PortSpec {
        PortSpec {
            name: self.interface.clone(),
            vlan: self.vlan,
            mtu: 0,
        }
    }

    pub fn route_specs(&self) -> Vec<RouteSpec> {
        self.routes
            .iter()
            .map(|r| RouteSpec {
                via: r.dev.clone(),
                destination: r.dst.clone(),
                source: r.src.clone(),
            })
            .collect()
    }

    /// Masquerade keyed by the network name, proxying ARP on the port
    pub fn masquerade_rules(&self) -> Option<MasqueradeRules> {
        if !self.ip_masq.enabled {
            return None;
        }
        Some(MasqueradeRules {
            name: self.name.clone(),
            device: self.port_spec().link_name(),
            source: self.ip_masq.source.clone(),
            ignore: self.ip_masq.ignore.clone(),
            egress_network: String::new(),
        })
    }
}
