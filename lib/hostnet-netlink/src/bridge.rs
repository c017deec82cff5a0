//! Bridge and port lifecycle

use hostnet_api::{BridgeSpec, PortSpec};
use tracing::{debug, info, warn};

use crate::error::ignore_exists;
use crate::{Link, LinkKind, Links, NetError, Result};

/// Create the bridge if needed, apply its MTU and bring it up
pub async fn ensure_bridge(links: &dyn Links, spec: &BridgeSpec) -> Result<Link> {
    ignore_exists(links.add_bridge(&spec.name).await)?;
    let bridge = lookup(links, &spec.name).await?;

    if spec.mtu != 0 {
        links.set_mtu(bridge.index, spec.mtu).await?;
    }
    links.set_up(bridge.index).await?;

    info!(bridge = %spec.name, mtu = spec.mtu, "Bridge ready");
    Ok(bridge)
}

/// Attach a port to `bridge`
///
/// Tagged ports create the `<name>.<vlan>` sub-interface on the parent
/// first; untagged ports enslave the named interface as is.
pub async fn ensure_port(
    links: &dyn Links,
    bridge: &Link,
    bridge_mtu: u32,
    port: &PortSpec,
) -> Result<Link> {
    let parent = lookup(links, &port.name).await?;

    let link = if port.vlan == 0 {
        parent
    } else {
        let name = port.link_name();
        ignore_exists(links.add_vlan(&name, parent.index, port.vlan).await)?;
        let vlan = lookup(links, &name).await?;

        let mtu = if port.mtu != 0 { port.mtu } else { bridge_mtu };
        if mtu != 0 {
            links.set_mtu(vlan.index, mtu).await?;
        }
        vlan
    };

    links.set_up(link.index).await?;
    links.set_master(link.index, bridge.index).await?;

    info!(bridge = %bridge.name, port = %link.name, "Port attached");
    Ok(link)
}

/// Remove a port by its link name
///
/// VLAN sub-interfaces are detached and deleted; any other interface is
/// only detached from its bridge.
pub async fn delete_port(links: &dyn Links, name: &str) -> Result<()> {
    let Some(link) = links.by_name(name).await? else {
        debug!(port = name, "Port already absent");
        return Ok(());
    };

    links.set_nomaster(link.index).await?;
    if link.kind == LinkKind::Vlan {
        links.delete(link.index).await?;
        info!(port = name, "VLAN port deleted");
    } else {
        info!(port = name, "Port detached");
    }
    Ok(())
}

/// Delete a bridge unless interfaces other than `declared` are attached
pub async fn delete_bridge(links: &dyn Links, name: &str, declared: &[String]) -> Result<()> {
    let Some(bridge) = links.by_name(name).await? else {
        debug!(bridge = name, "Bridge already absent");
        return Ok(());
    };

    let foreign: Vec<String> = links
        .bridge_ports(name)
        .await?
        .into_iter()
        .filter(|port| !declared.contains(port))
        .collect();
    if !foreign.is_empty() {
        warn!(bridge = name, ports = ?foreign, "Bridge still has foreign ports");
        return Err(NetError::BridgeBusy {
            bridge: name.to_string(),
            ports: foreign,
        });
    }

    links.delete(bridge.index).await?;
    info!(bridge = name, "Bridge deleted");
    Ok(())
}

async fn lookup(links: &dyn Links, name: &str) -> Result<Link> {
    links
        .by_name(name)
        .await?
        .ok_or_else(|| NetError::NotFound(format!("link {}", name)))
}
