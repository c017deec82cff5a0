//! IPv4 routing table access and static route installation

use std::net::Ipv4Addr;
use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use hostnet_api::RouteSpec;
use ipnetwork::Ipv4Network;
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteHeader, RouteMessage};
use rtnetlink::Handle;
use tracing::{debug, info};

use crate::error::ignore_exists;
use crate::{Links, NetError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteScope {
    #[default]
    Universe,
    Link,
}

/// An IPv4 route in the main table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Route {
    pub destination: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub oif: Option<u32>,
    pub scope: RouteScope,
    pub pref_source: Option<Ipv4Addr>,
}

impl Ipv4Route {
    pub fn new(destination: Ipv4Network) -> Self {
        Self {
            destination,
            gateway: None,
            oif: None,
            scope: RouteScope::Universe,
            pref_source: None,
        }
    }
}

#[async_trait]
pub trait Routes: Send + Sync {
    /// Dump the IPv4 main routing table
    async fn list(&self) -> Result<Vec<Ipv4Route>>;
    /// Install a route; an identical existing route fails with `AlreadyExists`
    async fn add(&self, route: &Ipv4Route) -> Result<()>;
}

/// [`Routes`] backed by rtnetlink
pub struct NetlinkRoutes {
    handle: Handle,
}

impl NetlinkRoutes {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Routes for NetlinkRoutes {
    async fn list(&self) -> Result<Vec<Ipv4Route>> {
        let mut stream = self
            .handle
            .route()
            .get(rtnetlink::IpVersion::V4)
            .execute();
        let mut routes = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            if msg.header.table != RouteHeader::RT_TABLE_MAIN {
                continue;
            }
            if let Some(route) = parse_route(&msg) {
                routes.push(route);
            }
        }
        Ok(routes)
    }

    async fn add(&self, route: &Ipv4Route) -> Result<()> {
        let scope = match route.scope {
            RouteScope::Universe => netlink_packet_route::route::RouteScope::Universe,
            RouteScope::Link => netlink_packet_route::route::RouteScope::Link,
        };
        let mut request = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(route.destination.ip(), route.destination.prefix())
            .scope(scope);
        if let Some(gateway) = route.gateway {
            request = request.gateway(gateway);
        }
        if let Some(oif) = route.oif {
            request = request.output_interface(oif);
        }
        if let Some(source) = route.pref_source {
            request = request.pref_source(source);
        }
        request
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("route {}", route.destination)))
    }
}

fn parse_route(msg: &RouteMessage) -> Option<Ipv4Route> {
    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut route = Ipv4Route::new(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).ok()?);

    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(addr)) => destination = *addr,
            RouteAttribute::Gateway(RouteAddress::Inet(addr)) => route.gateway = Some(*addr),
            RouteAttribute::PrefSource(RouteAddress::Inet(addr)) => {
                route.pref_source = Some(*addr)
            }
            RouteAttribute::Oif(index) => route.oif = Some(*index),
            _ => {}
        }
    }

    route.destination = Ipv4Network::new(destination, msg.header.destination_prefix_length).ok()?;
    route.scope = if msg.header.scope == netlink_packet_route::route::RouteScope::Link {
        RouteScope::Link
    } else {
        RouteScope::Universe
    };
    Some(route)
}

/// Parse a CIDR and clear its host bits
pub fn parse_network(cidr: &str) -> Result<Ipv4Network> {
    let net = Ipv4Network::from_str(cidr).map_err(|e| NetError::InvalidCidr(cidr.to_string(), e))?;
    Ipv4Network::new(net.network(), net.prefix())
        .map_err(|e| NetError::InvalidCidr(cidr.to_string(), e))
}

/// Install a static route
///
/// `via` is a gateway address when it parses as one, otherwise the name of
/// the device the route is bound to at link scope. A non-empty `source`
/// names an existing host route whose preferred source address is reused.
pub async fn add_route(links: &dyn Links, routes: &dyn Routes, spec: &RouteSpec) -> Result<()> {
    let destination = parse_network(&spec.destination)?;
    let mut route = Ipv4Route::new(destination);

    match spec.via.parse::<Ipv4Addr>() {
        Ok(gateway) => {
            route.gateway = Some(gateway);
            route.scope = RouteScope::Universe;
        }
        Err(_) => {
            let link = links
                .by_name(&spec.via)
                .await?
                .ok_or_else(|| NetError::NotFound(format!("link {}", spec.via)))?;
            route.oif = Some(link.index);
            route.scope = RouteScope::Link;
        }
    }

    if !spec.source.is_empty() {
        route.pref_source = Some(source_address(routes, &spec.source).await?);
    }

    info!(
        destination = %destination,
        via = %spec.via,
        source = ?route.pref_source,
        "Adding static route"
    );
    ignore_exists(routes.add(&route).await)
}

/// Preferred source address of the host route for `cidr`
pub async fn source_address(routes: &dyn Routes, cidr: &str) -> Result<Ipv4Addr> {
    let network = parse_network(cidr)?;
    routes
        .list()
        .await?
        .into_iter()
        .filter(|r| r.destination == network)
        .filter_map(|r| r.pref_source)
        .last()
        .ok_or_else(|| NetError::NoSourceAddress(cidr.to_string()))
}

/// Name of the interface the kernel would use to reach `cidr`
///
/// The address part of the CIDR is matched against the main table by longest
/// prefix.
pub async fn egress_interface(links: &dyn Links, routes: &dyn Routes, cidr: &str) -> Result<String> {
    let target = Ipv4Network::from_str(cidr)
        .map_err(|e| NetError::InvalidCidr(cidr.to_string(), e))?
        .ip();

    let oif = routes
        .list()
        .await?
        .into_iter()
        .filter(|r| r.destination.contains(target))
        .filter_map(|r| r.oif.map(|oif| (r.destination.prefix(), oif)))
        .max_by_key(|(prefix, _)| *prefix)
        .map(|(_, oif)| oif)
        .ok_or_else(|| NetError::NoEgressRoute(cidr.to_string()))?;

    let link = links
        .by_index(oif)
        .await?
        .ok_or_else(|| NetError::NoEgressRoute(cidr.to_string()))?;
    debug!(network = %cidr, interface = %link.name, "Resolved egress interface");
    Ok(link.name)
}
