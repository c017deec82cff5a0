//! Diffing of applied attachment specs
//!
//! The previously applied spec is compared with the current one to find the
//! ports and bridges that were dropped. Routes and firewall rules are not
//! diffed.
//!
//! Ports are compared by position: `prev.bridge[i].ports[j]` against
//! `curr.bridge[i].ports[j]`. Reordering ports therefore reports the moved
//! entries as removed; they are recreated by the following apply.

use std::collections::BTreeMap;

use hostnet_api::v1alpha1::LAST_APPLIED_ANNOTATION;
use hostnet_api::{NetworkAttachmentSpec, PortSpec};
use tracing::debug;

use crate::{CoreError, Result};

/// Host resources present in the previous spec but not in the current one
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecDelta {
    /// Link names of removed ports (`name` or `name.vlan`)
    pub ports: Vec<String>,
    /// Names of removed bridges
    pub bridges: Vec<String>,
}

impl SpecDelta {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.bridges.is_empty()
    }
}

/// Compute the ports and bridges to remove when moving from `prev` to `curr`
pub fn diff_specs(prev: &NetworkAttachmentSpec, curr: &NetworkAttachmentSpec) -> SpecDelta {
    let mut delta = SpecDelta::default();

    for (i, prev_bridge) in prev.bridge.iter().enumerate() {
        let curr_bridge = curr.bridge.get(i);

        for (j, prev_port) in prev_bridge.ports.iter().enumerate() {
            let curr_port = curr_bridge.and_then(|b| b.ports.get(j));
            if port_removed(prev_port, curr_port) {
                debug!(
                    bridge = %prev_bridge.name,
                    port = %prev_port.link_name(),
                    "Port removed from spec"
                );
                push_unique(&mut delta.ports, prev_port.link_name());
            }
        }

        if !curr.bridge.iter().any(|b| b.name == prev_bridge.name) {
            debug!(bridge = %prev_bridge.name, "Bridge removed from spec");
            push_unique(&mut delta.bridges, prev_bridge.name.clone());
        }
    }

    delta
}

/// Parse the last-applied spec from an attachment's annotations
///
/// Returns `None` when the attachment has never been applied.
pub fn last_applied_spec(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<NetworkAttachmentSpec>> {
    match annotations.get(LAST_APPLIED_ANNOTATION) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(CoreError::LastApplied),
        None => Ok(None),
    }
}

fn port_removed(prev: &PortSpec, curr: Option<&PortSpec>) -> bool {
    match curr {
        None => true,
        Some(curr) => curr.name != prev.name || curr.vlan != prev.vlan,
    }
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}
