//! Host network appliers for hostnet
//!
//! Every kernel or packet-filter surface sits behind a narrow async trait:
//! - [`Links`]: bridges, VLAN sub-interfaces and link state (rtnetlink)
//! - [`Routes`]: the IPv4 main routing table (rtnetlink)
//! - [`Iptables`] / [`Ebtables`]: NAT chain and ARP-proxy suppression
//! - [`Sysctl`]: kernel parameters under `/proc/sys`
//! - [`GratuitousArp`]: unsolicited ARP announcements
//!
//! [`HostNetwork`] composes them to apply or tear down a whole attachment.

pub mod arping;
pub mod bridge;
pub mod ebtables;
pub mod error;
pub mod host;
pub mod iptables;
pub mod links;
pub mod masquerade;
pub mod routes;
pub mod sysctl;

#[cfg(test)]
pub(crate) mod testing;

pub use arping::{GratuitousArp, PacketArp};
pub use ebtables::{Ebtables, EbtablesCli};
pub use error::{NetError, Result};
pub use host::HostNetwork;
pub use iptables::{Iptables, IptablesCli};
pub use links::{Link, LinkKind, Links, NetlinkLinks};
pub use masquerade::{Masquerade, MasqueradeRules};
pub use routes::{add_route, Ipv4Route, NetlinkRoutes, RouteScope, Routes};
pub use sysctl::{ProcSysctl, Sysctl};

/// Default floating gateway address answered by the ARP proxy
pub const DEFAULT_VIRTUAL_IP: std::net::Ipv4Addr = std::net::Ipv4Addr::new(169, 254, 1, 1);
