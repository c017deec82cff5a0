use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BridgeSpec, MasqueradeSpec, RouteSpec};

/// NetworkAttachment is the materialization of a Network on a single node.
/// It is created and kept in sync by the node's network controller and owned
/// by its parent Network.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "network.hostnet.io",
    version = "v1alpha1",
    kind = "NetworkAttachment",
    plural = "networkattachments",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    status = "NetworkAttachmentStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentSpec {
    /// Bridges and their ports
    pub bridge: Vec<BridgeSpec>,

    /// Masquerade configuration
    #[serde(default)]
    pub ip_masq: MasqueradeSpec,

    /// Static routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteSpec>,

    /// Node this attachment is applied on
    pub node_name: String,

    /// Selectors copied from the parent Network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_selectors: Vec<LabelSelector>,
}

/// Status of a NetworkAttachment (reserved)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkAttachmentStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_round_trips_through_annotation_json() {
        let json = r#"{
            "bridge": [{"name": "br0", "mtu": 9000, "ports": [{"name": "eth1", "vlan": 100}]}],
            "ipMasq": {"enabled": true, "source": "10.1.0.0/16", "bridge": "br0"},
            "routes": [{"via": "10.0.0.1", "destination": "192.168.1.0/24"}],
            "nodeName": "node-a"
        }"#;
        let spec: NetworkAttachmentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.bridge[0].ports[0].link_name(), "eth1.100");
        assert!(spec.ip_masq.enabled);
        assert_eq!(spec.node_name, "node-a");

        let reparsed: NetworkAttachmentSpec =
            serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();
        assert_eq!(reparsed, spec);
    }
}
