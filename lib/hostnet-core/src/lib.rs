//! Core reconciliation logic shared by the hostnet controllers
//!
//! This library provides:
//! - Node identity resolution
//! - Node selector matching for network placement
//! - Diffing of applied attachment specs to find host resources to remove
//! - Construction of per-node attachments from a network
//! - Reconcile metrics

pub mod attachment;
pub mod diff;
pub mod error;
pub mod metrics;
pub mod node;
pub mod selector;

pub use attachment::{attachment_name, new_attachment, sync_attachment_spec};
pub use diff::{diff_specs, last_applied_spec, SpecDelta};
pub use error::{CoreError, Result};
pub use metrics::ReconcileMetrics;
pub use node::{resolve_node_name, NODE_NAME_ENV};
pub use selector::{matches_any, selector_matches};
