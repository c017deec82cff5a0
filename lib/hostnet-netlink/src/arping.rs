//! Gratuitous ARP over an AF_PACKET socket

use std::mem;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::info;

use crate::{Links, NetError, Result};

const ETH_ALEN: usize = 6;
const ARP_FRAME_LEN: usize = 42;
const BROADCAST: [u8; ETH_ALEN] = [0xff; ETH_ALEN];

#[async_trait]
pub trait GratuitousArp: Send + Sync {
    /// Announce `ip` on `device` so neighbours relearn its MAC
    async fn announce(&self, device: &str, ip: Ipv4Addr) -> Result<()>;
}

/// Sends unsolicited ARP replies from the device's own MAC
pub struct PacketArp {
    links: Arc<dyn Links>,
}

impl PacketArp {
    pub fn new(links: Arc<dyn Links>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl GratuitousArp for PacketArp {
    async fn announce(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        let link = self
            .links
            .by_name(device)
            .await?
            .ok_or_else(|| NetError::NotFound(format!("link {}", device)))?;
        let mac = link
            .mac
            .ok_or_else(|| NetError::NotFound(format!("hardware address of {}", device)))?;

        let frame = arp_announcement(mac, ip);
        let index = link.index;
        tokio::task::spawn_blocking(move || send_frame(index, &frame))
            .await
            .map_err(|e| NetError::Io(std::io::Error::other(e)))??;

        info!(device, ip = %ip, "Sent gratuitous ARP");
        Ok(())
    }
}

fn send_frame(ifindex: u32, frame: &[u8]) -> Result<()> {
    let protocol = Protocol::from(i32::from((libc::ETH_P_ARP as u16).to_be()));
    let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol))?;

    // SAFETY: sockaddr_ll fits in sockaddr_storage and every field is
    // initialized before the address is handed to the kernel.
    let addr = unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let ll = &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_ll);
        ll.sll_family = libc::AF_PACKET as u16;
        ll.sll_protocol = (libc::ETH_P_ARP as u16).to_be();
        ll.sll_ifindex = ifindex as i32;
        ll.sll_halen = ETH_ALEN as u8;
        ll.sll_addr[..ETH_ALEN].copy_from_slice(&BROADCAST);
        SockAddr::new(storage, mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t)
    };

    socket.send_to(frame, &addr)?;
    Ok(())
}

/// Ethernet frame carrying an ARP reply that maps `ip` to `mac`,
/// broadcast to every host on the segment
pub fn arp_announcement(mac: [u8; ETH_ALEN], ip: Ipv4Addr) -> [u8; ARP_FRAME_LEN] {
    let mut frame = [0u8; ARP_FRAME_LEN];
    let ip = ip.octets();

    // Ethernet header
    frame[0..6].copy_from_slice(&BROADCAST);
    frame[6..12].copy_from_slice(&mac);
    frame[12..14].copy_from_slice(&(libc::ETH_P_ARP as u16).to_be_bytes());

    // ARP payload: Ethernet/IPv4, opcode 2 (reply)
    frame[14..16].copy_from_slice(&1u16.to_be_bytes());
    frame[16..18].copy_from_slice(&(libc::ETH_P_IP as u16).to_be_bytes());
    frame[18] = ETH_ALEN as u8;
    frame[19] = 4;
    frame[20..22].copy_from_slice(&2u16.to_be_bytes());
    frame[22..28].copy_from_slice(&mac);
    frame[28..32].copy_from_slice(&ip);
    frame[32..38].copy_from_slice(&BROADCAST);
    frame[38..42].copy_from_slice(&ip);

    frame
}
