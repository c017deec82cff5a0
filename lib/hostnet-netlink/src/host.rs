//! Whole-attachment apply and teardown

use std::net::Ipv4Addr;
use std::sync::Arc;

use hostnet_api::NetworkAttachmentSpec;
use hostnet_core::SpecDelta;
use tracing::{info, warn};

use crate::bridge::{delete_bridge, delete_port, ensure_bridge, ensure_port};
use crate::{
    add_route, Ebtables, EbtablesCli, GratuitousArp, Iptables, IptablesCli, Links, Masquerade,
    MasqueradeRules, NetlinkLinks, NetlinkRoutes, PacketArp, ProcSysctl, Result, Routes, Sysctl,
};

/// Applies attachment specs to the host
pub struct HostNetwork {
    links: Arc<dyn Links>,
    routes: Arc<dyn Routes>,
    iptables: Arc<dyn Iptables>,
    ebtables: Arc<dyn Ebtables>,
    sysctl: Arc<dyn Sysctl>,
    arp: Arc<dyn GratuitousArp>,
    virtual_ip: Ipv4Addr,
}

impl HostNetwork {
    /// Host network backed by the running kernel; needs a tokio runtime
    pub fn new(virtual_ip: Ipv4Addr) -> Result<Self> {
        let netlink = NetlinkLinks::new()?;
        let routes = NetlinkRoutes::new(netlink.handle());
        let links: Arc<dyn Links> = Arc::new(netlink);

        Ok(Self {
            arp: Arc::new(PacketArp::new(links.clone())),
            links,
            routes: Arc::new(routes),
            iptables: Arc::new(IptablesCli),
            ebtables: Arc::new(EbtablesCli),
            sysctl: Arc::new(ProcSysctl),
            virtual_ip,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        links: Arc<dyn Links>,
        routes: Arc<dyn Routes>,
        iptables: Arc<dyn Iptables>,
        ebtables: Arc<dyn Ebtables>,
        sysctl: Arc<dyn Sysctl>,
        arp: Arc<dyn GratuitousArp>,
        virtual_ip: Ipv4Addr,
    ) -> Self {
        Self {
            links,
            routes,
            iptables,
            ebtables,
            sysctl,
            arp,
            virtual_ip,
        }
    }

    pub fn links(&self) -> &dyn Links {
        self.links.as_ref()
    }

    pub fn routes(&self) -> &dyn Routes {
        self.routes.as_ref()
    }

    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.virtual_ip
    }

    pub fn masquerade(&self) -> Masquerade<'_> {
        Masquerade {
            links: self.links.as_ref(),
            routes: self.routes.as_ref(),
            iptables: self.iptables.as_ref(),
            ebtables: self.ebtables.as_ref(),
            sysctl: self.sysctl.as_ref(),
            arp: self.arp.as_ref(),
            virtual_ip: self.virtual_ip,
        }
    }

    /// Announce the floating gateway address on `device`
    pub async fn announce(&self, device: &str) -> Result<()> {
        self.arp.announce(device, self.virtual_ip).await
    }

    /// Create bridges and ports, add routes, then masquerade if enabled
    pub async fn create_network(&self, spec: &NetworkAttachmentSpec) -> Result<()> {
        for bridge_spec in &spec.bridge {
            let bridge = ensure_bridge(self.links(), bridge_spec).await?;
            for port in &bridge_spec.ports {
                ensure_port(self.links(), &bridge, bridge_spec.mtu, port).await?;
            }
        }

        for route in &spec.routes {
            add_route(self.links(), self.routes(), route).await?;
        }

        if spec.ip_masq.enabled {
            self.masquerade()
                .enable(&MasqueradeRules::from_spec(&spec.ip_masq))
                .await?;
        }

        info!(node = %spec.node_name, bridges = spec.bridge.len(), "Network applied");
        Ok(())
    }

    /// Tear down every port and bridge of `spec` and its masquerade rules
    ///
    /// Routes are left in place.
    pub async fn delete_network(&self, spec: &NetworkAttachmentSpec) -> Result<()> {
        for bridge in &spec.bridge {
            let declared: Vec<String> = bridge.ports.iter().map(|p| p.link_name()).collect();
            for port in &declared {
                delete_port(self.links(), port).await?;
            }
            delete_bridge(self.links(), &bridge.name, &declared).await?;
        }

        let device = &spec.ip_masq.bridge;
        if !device.is_empty() {
            self.masquerade().delete(device, device).await?;
        }

        info!(node = %spec.node_name, "Network removed");
        Ok(())
    }

    /// Remove the ports and bridges dropped since `prev` was applied
    pub async fn cleanup(&self, prev: &NetworkAttachmentSpec, delta: &SpecDelta) -> Result<()> {
        for port in &delta.ports {
            warn!(port = %port, "Removing port dropped from spec");
            delete_port(self.links(), port).await?;
        }

        for name in &delta.bridges {
            let declared: Vec<String> = prev
                .bridge
                .iter()
                .filter(|b| &b.name == name)
                .flat_map(|b| b.ports.iter().map(|p| p.link_name()))
                .collect();
            warn!(bridge = %name, "Removing bridge dropped from spec");
            delete_bridge(self.links(), name, &declared).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fakes;
    use crate::LinkKind;
    use hostnet_api::{BridgeSpec, MasqueradeSpec, PortSpec, RouteSpec};
    use hostnet_core::diff_specs;

    fn spec() -> NetworkAttachmentSpec {
        NetworkAttachmentSpec {
            bridge: vec![BridgeSpec {
                name: "br0".to_string(),
                mtu: 9000,
                ports: vec![PortSpec {
                    name: "eth1".to_string(),
                    vlan: 100,
                    mtu: 0,
                }],
            }],
            routes: vec![RouteSpec {
                via: "10.0.0.1".to_string(),
                destination: "192.168.1.0/24".to_string(),
                source: String::new(),
            }],
            node_name: "node-a".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_builds_bridge_vlan_and_route() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();

        host.create_network(&spec()).await.unwrap();

        let br0 = fakes.links.get("br0").unwrap();
        let vlan = fakes.links.get("eth1.100").unwrap();
        assert_eq!(br0.kind, LinkKind::Bridge);
        assert_eq!(br0.mtu, 9000);
        assert!(br0.up);
        assert_eq!(vlan.mtu, 9000);
        assert_eq!(vlan.master, Some(br0.index));
        assert_eq!(
            vlan.vlan,
            Some((100, fakes.links.get("eth1").unwrap().index))
        );
        assert_eq!(fakes.routes.added().len(), 1);
        // Masquerade disabled: no packet filter writes
        assert!(fakes.iptables.is_untouched());
        assert!(fakes.ebtables.rules().is_empty());
        assert!(fakes.arp.sent().is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_is_idempotent() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();

        host.create_network(&spec()).await.unwrap();
        host.create_network(&spec()).await.unwrap();

        assert_eq!(fakes.links.names(), vec!["br0", "eth1", "eth1.100"]);
        assert_eq!(fakes.routes.added().len(), 1);
    }

    #[tokio::test]
    async fn test_create_with_masquerade() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();
        let mut spec = spec();
        spec.ip_masq = MasqueradeSpec {
            enabled: true,
            source: "10.1.0.0/16".to_string(),
            bridge: "br0".to_string(),
            ..Default::default()
        };

        host.create_network(&spec).await.unwrap();

        assert!(fakes.iptables.has_chain("nat", "br0-POSTROUTING"));
        assert_eq!(fakes.arp.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_vlan_bridge_and_nat_even_when_disabled() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();
        let mut spec = spec();
        spec.ip_masq = MasqueradeSpec {
            enabled: true,
            source: "10.1.0.0/16".to_string(),
            bridge: "br0".to_string(),
            ..Default::default()
        };
        host.create_network(&spec).await.unwrap();

        spec.ip_masq.enabled = false;
        host.delete_network(&spec).await.unwrap();

        assert_eq!(fakes.links.names(), vec!["eth1"]);
        assert!(!fakes.iptables.has_chain("nat", "br0-POSTROUTING"));
        assert!(fakes.ebtables.rules().is_empty());

        // Already gone
        host.delete_network(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_dropped_port_only() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();

        let mut prev = spec();
        prev.bridge[0].ports.push(PortSpec {
            name: "eth1".to_string(),
            vlan: 200,
            mtu: 0,
        });
        host.create_network(&prev).await.unwrap();

        let curr = spec();
        let delta = diff_specs(&prev, &curr);
        host.cleanup(&prev, &delta).await.unwrap();
        host.create_network(&curr).await.unwrap();

        assert_eq!(fakes.links.names(), vec!["br0", "eth1", "eth1.100"]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_dropped_bridge() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();

        let mut prev = spec();
        prev.bridge.push(BridgeSpec {
            name: "br1".to_string(),
            mtu: 0,
            ports: vec![PortSpec {
                name: "eth1".to_string(),
                vlan: 300,
                mtu: 0,
            }],
        });
        host.create_network(&prev).await.unwrap();

        let curr = spec();
        let delta = diff_specs(&prev, &curr);
        host.cleanup(&prev, &delta).await.unwrap();

        assert_eq!(fakes.links.names(), vec!["br0", "eth1", "eth1.100"]);
    }

    #[tokio::test]
    async fn test_delete_needs_cleanup_of_unapplied_removals() {
        let fakes = Fakes::new();
        fakes.links.add_physical("eth1");
        let host = fakes.host();

        let mut prev = spec();
        prev.bridge[0].ports.push(PortSpec {
            name: "eth1".to_string(),
            vlan: 200,
            mtu: 0,
        });
        host.create_network(&prev).await.unwrap();

        // eth1.200 was never cleaned up, so it looks foreign to the bridge
        let curr = spec();
        assert!(matches!(
            host.delete_network(&curr).await,
            Err(crate::NetError::BridgeBusy { .. })
        ));

        host.cleanup(&prev, &diff_specs(&prev, &curr)).await.unwrap();
        host.delete_network(&curr).await.unwrap();
        assert_eq!(fakes.links.names(), vec!["eth1"]);
    }
}
