//! hostnet API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources driving host networking:
//! - Network: cluster-wide intent for bridges, routes and masquerade
//! - NetworkAttachment: per-node materialization of a Network
//!
//! It also carries read-only bindings to the KubeVirt resources the
//! migration watcher observes.

pub mod v1alpha1;
pub mod kubevirt;

pub use v1alpha1::{
    BridgeSpec, MasqueradeSpec, Network, NetworkAttachment, NetworkAttachmentSpec, NetworkSpec,
    PortSpec, RouteSpec,
};
