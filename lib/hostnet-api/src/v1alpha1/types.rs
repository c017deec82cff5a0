use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Linux bridge and the interfaces enslaved to it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BridgeSpec {
    /// Name of the bridge device (e.g., "br0")
    pub name: String,

    /// MTU of the bridge; zero leaves the kernel default
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mtu: u32,

    /// Ports attached to the bridge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
}

/// Bridge port
///
/// A zero VLAN attaches the named interface directly; any other tag
/// creates and attaches the sub-interface `<name>.<vlan>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortSpec {
    /// Parent interface name (e.g., "eth1")
    pub name: String,

    /// 802.1Q tag, 0 for untagged
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub vlan: u16,

    /// MTU of the port; zero inherits the bridge MTU
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mtu: u32,
}

impl PortSpec {
    /// Name of the link this port materializes as on the host
    pub fn link_name(&self) -> String {
        if self.vlan == 0 {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.vlan)
        }
    }
}

/// Static IPv4 route
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteSpec {
    /// Gateway IP address or, when it does not parse as one, a device name
    pub via: String,

    /// Destination CIDR
    pub destination: String,

    /// CIDR of an existing host route whose preferred source is reused
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Source NAT and ARP-proxy for virtual machine traffic
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MasqueradeSpec {
    #[serde(default)]
    pub enabled: bool,

    /// Source CIDR eligible for NAT
    #[serde(default)]
    pub source: String,

    /// Destinations exempt from NAT
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,

    /// Device holding the ARP proxy; also keys the NAT chain
    #[serde(default)]
    pub bridge: String,

    /// Network whose outbound route selects the SNAT egress interface
    #[serde(
        rename = "egressnetwork",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub egress_network: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_u16(value: &u16) -> bool {
    *value == 0
}
