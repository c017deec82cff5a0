/// API version v1alpha1 for hostnet CRDs

pub mod network;
pub mod network_attachment;
pub mod types;

pub use network::{Network, NetworkSpec, NetworkStatus};
pub use network_attachment::{NetworkAttachment, NetworkAttachmentSpec, NetworkAttachmentStatus};
pub use types::{BridgeSpec, MasqueradeSpec, PortSpec, RouteSpec};

/// API group for hostnet resources
pub const API_GROUP: &str = "network.hostnet.io";
/// API version for hostnet resources
pub const API_VERSION: &str = "v1alpha1";

/// Blocks removal of a NetworkAttachment until its host resources are torn down
pub const ATTACHMENT_FINALIZER: &str = "network.hostnet.io/finalizer";

/// Holds the JSON of the last fully applied NetworkAttachment spec
pub const LAST_APPLIED_ANNOTATION: &str = "networkattachment/last-applied-configuration";

/// Label carrying the target node of a NetworkAttachment
pub const NODE_LABEL: &str = "network.hostnet.io/node";
