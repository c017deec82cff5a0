use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BridgeSpec, MasqueradeSpec, RouteSpec};

/// Network describes host networking that should exist on every node
/// matched by its node selectors
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "network.hostnet.io",
    version = "v1alpha1",
    kind = "Network",
    plural = "networks",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    status = "NetworkStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Bridges and their ports
    pub bridge: Vec<BridgeSpec>,

    /// Masquerade configuration
    #[serde(default)]
    pub ip_masq: MasqueradeSpec,

    /// Static routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteSpec>,

    /// Nodes this network applies to; empty means every node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_selectors: Vec<LabelSelector>,
}

/// Status of a Network (reserved)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkStatus {}
