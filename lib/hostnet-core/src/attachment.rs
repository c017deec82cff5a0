//! Construction and synchronization of per-node attachments

use std::collections::BTreeMap;

use hostnet_api::v1alpha1::NODE_LABEL;
use hostnet_api::{Network, NetworkAttachment, NetworkAttachmentSpec, NetworkSpec};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Name of the attachment materializing `network` on `node`
pub fn attachment_name(node: &str, network: &str) -> String {
    format!("{}-{}", node, network)
}

/// Build the attachment for `network` on `node`
///
/// The attachment lives in the network's namespace, is labelled with the
/// node and is controller-owned by the network.
pub fn new_attachment(node: &str, network: &Network) -> NetworkAttachment {
    let labels = BTreeMap::from([(NODE_LABEL.to_string(), node.to_string())]);

    let spec = NetworkAttachmentSpec {
        bridge: network.spec.bridge.clone(),
        ip_masq: network.spec.ip_masq.clone(),
        routes: network.spec.routes.clone(),
        node_selectors: network.spec.node_selectors.clone(),
        node_name: node.to_string(),
    };

    NetworkAttachment {
        metadata: ObjectMeta {
            name: Some(attachment_name(node, &network.name_any())),
            namespace: network.namespace(),
            labels: Some(labels),
            owner_references: network.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Copy the network's bridge, masquerade and route config into `target`.
/// Returns whether any of them changed.
///
/// Selectors ride along with a real change but never trigger a write on
/// their own; the attachment reconciler ignores them.
pub fn sync_attachment_spec(source: &NetworkSpec, target: &mut NetworkAttachmentSpec) -> bool {
    let mut changed = false;

    if target.bridge != source.bridge {
        target.bridge = source.bridge.clone();
        changed = true;
    }
    if target.ip_masq != source.ip_masq {
        target.ip_masq = source.ip_masq.clone();
        changed = true;
    }
    if target.routes != source.routes {
        target.routes = source.routes.clone();
        changed = true;
    }
    if changed {
        target.node_selectors = source.node_selectors.clone();
    }

    changed
}
