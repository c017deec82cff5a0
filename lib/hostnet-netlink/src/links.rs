//! Link management over rtnetlink

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::Handle;
use tracing::debug;

use crate::{NetError, Result};

const SYSFS_NET: &str = "/sys/class/net";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Vlan,
    Other,
}

/// A network interface as seen by the kernel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub kind: LinkKind,
    pub mac: Option<[u8; 6]>,
}

/// Link operations needed to build bridges and VLAN ports
///
/// Creating a link that exists fails with [`NetError::AlreadyExists`];
/// lookups of missing links return `None`.
#[async_trait]
pub trait Links: Send + Sync {
    async fn by_name(&self, name: &str) -> Result<Option<Link>>;
    async fn by_index(&self, index: u32) -> Result<Option<Link>>;
    async fn add_bridge(&self, name: &str) -> Result<()>;
    async fn add_vlan(&self, name: &str, parent: u32, vlan: u16) -> Result<()>;
    async fn set_mtu(&self, index: u32, mtu: u32) -> Result<()>;
    async fn set_up(&self, index: u32) -> Result<()>;
    async fn set_master(&self, index: u32, master: u32) -> Result<()>;
    async fn set_nomaster(&self, index: u32) -> Result<()>;
    async fn delete(&self, index: u32) -> Result<()>;
    /// Names of the interfaces enslaved to a bridge
    async fn bridge_ports(&self, bridge: &str) -> Result<Vec<String>>;
}

/// [`Links`] backed by a persistent rtnetlink connection
pub struct NetlinkLinks {
    handle: Handle,
    _conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkLinks {
    /// Open a netlink connection; must be called inside a tokio runtime
    pub fn new() -> Result<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            _conn_task: conn_task,
        })
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle.clone()
    }
}

#[async_trait]
impl Links for NetlinkLinks {
    async fn by_name(&self, name: &str) -> Result<Option<Link>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(msg) => Ok(msg.map(|m| parse_link(&m))),
            Err(e) => match NetError::from_netlink(e, name) {
                NetError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn by_index(&self, index: u32) -> Result<Option<Link>> {
        let subject = format!("link #{}", index);
        let mut links = self.handle.link().get().match_index(index).execute();
        match links.try_next().await {
            Ok(msg) => Ok(msg.map(|m| parse_link(&m))),
            Err(e) => match NetError::from_netlink(e, &subject) {
                NetError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn add_bridge(&self, name: &str) -> Result<()> {
        self.handle
            .link()
            .add()
            .bridge(name.to_string())
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, name))
    }

    async fn add_vlan(&self, name: &str, parent: u32, vlan: u16) -> Result<()> {
        self.handle
            .link()
            .add()
            .vlan(name.to_string(), parent, vlan)
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, name))
    }

    async fn set_mtu(&self, index: u32, mtu: u32) -> Result<()> {
        self.handle
            .link()
            .set(index)
            .mtu(mtu)
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("link #{}", index)))
    }

    async fn set_up(&self, index: u32) -> Result<()> {
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("link #{}", index)))
    }

    async fn set_master(&self, index: u32, master: u32) -> Result<()> {
        self.handle
            .link()
            .set(index)
            .controller(master)
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("link #{}", index)))
    }

    async fn set_nomaster(&self, index: u32) -> Result<()> {
        self.handle
            .link()
            .set(index)
            .nocontroller()
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("link #{}", index)))
    }

    async fn delete(&self, index: u32) -> Result<()> {
        debug!(index, "Deleting link");
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| NetError::from_netlink(e, &format!("link #{}", index)))
    }

    async fn bridge_ports(&self, bridge: &str) -> Result<Vec<String>> {
        let path = format!("{}/{}/brif", SYSFS_NET, bridge);
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut ports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            ports.push(entry.file_name().to_string_lossy().into_owned());
        }
        ports.sort();
        Ok(ports)
    }
}

fn parse_link(msg: &LinkMessage) -> Link {
    let mut name = String::new();
    let mut kind = LinkKind::Other;
    let mut mac = None;

    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(n) => name = n.clone(),
            LinkAttribute::Address(addr) => {
                if let Ok(bytes) = <[u8; 6]>::try_from(addr.as_slice()) {
                    mac = Some(bytes);
                }
            }
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(k) = info {
                        kind = match k {
                            InfoKind::Bridge => LinkKind::Bridge,
                            InfoKind::Vlan => LinkKind::Vlan,
                            _ => LinkKind::Other,
                        };
                    }
                }
            }
            _ => {}
        }
    }

    Link {
        index: msg.header.index,
        name,
        kind,
        mac,
    }
}
