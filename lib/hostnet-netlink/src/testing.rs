//! In-memory kernel and packet-filter fakes

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    Ebtables, GratuitousArp, HostNetwork, Ipv4Route, Iptables, Link, LinkKind, Links, Masquerade,
    NetError, Result, Routes, Sysctl, DEFAULT_VIRTUAL_IP,
};

#[derive(Clone, Debug)]
pub struct FakeLink {
    pub index: u32,
    pub kind: LinkKind,
    pub mtu: u32,
    pub up: bool,
    pub master: Option<u32>,
    /// VLAN id and parent index of a VLAN link
    pub vlan: Option<(u16, u32)>,
}

pub struct FakeLinks {
    links: Mutex<BTreeMap<String, FakeLink>>,
    next_index: AtomicU32,
}

impl FakeLinks {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(BTreeMap::new()),
            next_index: AtomicU32::new(2),
        }
    }

    fn insert(&self, name: &str, kind: LinkKind) -> u32 {
        self.insert_with(name, kind, None)
    }

    fn insert_with(&self, name: &str, kind: LinkKind, vlan: Option<(u16, u32)>) -> u32 {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.links.lock().unwrap().insert(
            name.to_string(),
            FakeLink {
                index,
                kind,
                mtu: 1500,
                up: false,
                master: None,
                vlan,
            },
        );
        index
    }

    pub fn add_physical(&self, name: &str) -> u32 {
        self.insert(name, LinkKind::Other)
    }

    pub fn get(&self, name: &str) -> Option<FakeLink> {
        self.links.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.links.lock().unwrap().keys().cloned().collect()
    }

    pub fn enslave(&self, port: &str, bridge: &str) {
        let mut links = self.links.lock().unwrap();
        let master = links[bridge].index;
        links.get_mut(port).unwrap().master = Some(master);
    }

    pub fn release(&self, port: &str) {
        self.links.lock().unwrap().get_mut(port).unwrap().master = None;
    }

    fn update(&self, index: u32, f: impl FnOnce(&mut FakeLink)) -> Result<()> {
        let mut links = self.links.lock().unwrap();
        let link = links
            .values_mut()
            .find(|l| l.index == index)
            .ok_or_else(|| NetError::NotFound(format!("link #{}", index)))?;
        f(link);
        Ok(())
    }
}

fn to_link(name: &str, link: &FakeLink) -> Link {
    Link {
        index: link.index,
        name: name.to_string(),
        kind: link.kind,
        mac: Some([0x02, 0, 0, 0, 0, link.index as u8]),
    }
}

#[async_trait]
impl Links for FakeLinks {
    async fn by_name(&self, name: &str) -> Result<Option<Link>> {
        Ok(self.get(name).map(|l| to_link(name, &l)))
    }

    async fn by_index(&self, index: u32) -> Result<Option<Link>> {
        let links = self.links.lock().unwrap();
        Ok(links
            .iter()
            .find(|(_, l)| l.index == index)
            .map(|(name, l)| to_link(name, l)))
    }

    async fn add_bridge(&self, name: &str) -> Result<()> {
        if self.get(name).is_some() {
            return Err(NetError::AlreadyExists(name.to_string()));
        }
        self.insert(name, LinkKind::Bridge);
        Ok(())
    }

    async fn add_vlan(&self, name: &str, parent: u32, vlan: u16) -> Result<()> {
        if self.get(name).is_some() {
            return Err(NetError::AlreadyExists(name.to_string()));
        }
        self.update(parent, |_| {})?;
        self.insert_with(name, LinkKind::Vlan, Some((vlan, parent)));
        Ok(())
    }

    async fn set_mtu(&self, index: u32, mtu: u32) -> Result<()> {
        self.update(index, |l| l.mtu = mtu)
    }

    async fn set_up(&self, index: u32) -> Result<()> {
        self.update(index, |l| l.up = true)
    }

    async fn set_master(&self, index: u32, master: u32) -> Result<()> {
        self.update(index, |l| l.master = Some(master))
    }

    async fn set_nomaster(&self, index: u32) -> Result<()> {
        self.update(index, |l| l.master = None)
    }

    async fn delete(&self, index: u32) -> Result<()> {
        let mut links = self.links.lock().unwrap();
        let before = links.len();
        links.retain(|_, l| l.index != index);
        if links.len() == before {
            return Err(NetError::NotFound(format!("link #{}", index)));
        }
        for link in links.values_mut() {
            if link.master == Some(index) {
                link.master = None;
            }
        }
        Ok(())
    }

    async fn bridge_ports(&self, bridge: &str) -> Result<Vec<String>> {
        let links = self.links.lock().unwrap();
        let index = links
            .get(bridge)
            .map(|l| l.index)
            .ok_or_else(|| NetError::NotFound(bridge.to_string()))?;
        Ok(links
            .iter()
            .filter(|(_, l)| l.master == Some(index))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

pub struct FakeRoutes {
    table: Mutex<Vec<Ipv4Route>>,
    added: Mutex<Vec<Ipv4Route>>,
}

impl FakeRoutes {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, route: Ipv4Route) {
        self.table.lock().unwrap().push(route);
    }

    pub fn added(&self) -> Vec<Ipv4Route> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl Routes for FakeRoutes {
    async fn list(&self) -> Result<Vec<Ipv4Route>> {
        Ok(self.table.lock().unwrap().clone())
    }

    async fn add(&self, route: &Ipv4Route) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        if table.iter().any(|r| r.destination == route.destination) {
            return Err(NetError::AlreadyExists(route.destination.to_string()));
        }
        table.push(route.clone());
        self.added.lock().unwrap().push(route.clone());
        Ok(())
    }
}

type ChainKey = (String, String);

pub struct FakeIptables {
    chains: Mutex<BTreeMap<ChainKey, Vec<Vec<String>>>>,
    calls: AtomicUsize,
}

impl FakeIptables {
    pub fn new() -> Self {
        Self {
            chains: Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn key(table: &str, chain: &str) -> ChainKey {
        (table.to_string(), chain.to_string())
    }

    fn builtin(chain: &str) -> bool {
        chain.chars().all(|c| c.is_ascii_uppercase())
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn rules(&self, table: &str, chain: &str) -> Vec<String> {
        self.chains
            .lock()
            .unwrap()
            .get(&Self::key(table, chain))
            .map(|rules| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    pub fn has_chain(&self, table: &str, chain: &str) -> bool {
        self.chains
            .lock()
            .unwrap()
            .contains_key(&Self::key(table, chain))
    }

    pub fn is_untouched(&self) -> bool {
        self.calls.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl Iptables for FakeIptables {
    async fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        self.touch();
        Ok(Self::builtin(chain) || self.has_chain(table, chain))
    }

    async fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.touch();
        self.chains
            .lock()
            .unwrap()
            .entry(Self::key(table, chain))
            .or_default();
        Ok(())
    }

    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> Result<bool> {
        self.touch();
        Ok(self
            .chains
            .lock()
            .unwrap()
            .get(&Self::key(table, chain))
            .is_some_and(|rules| rules.iter().any(|r| r == rule)))
    }

    async fn insert(&self, table: &str, chain: &str, position: u32, rule: &[String]) -> Result<()> {
        self.touch();
        let mut chains = self.chains.lock().unwrap();
        let rules = chains.entry(Self::key(table, chain)).or_default();
        let at = (position as usize).saturating_sub(1).min(rules.len());
        rules.insert(at, rule.to_vec());
        Ok(())
    }

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        self.touch();
        self.chains
            .lock()
            .unwrap()
            .entry(Self::key(table, chain))
            .or_default()
            .push(rule.to_vec());
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        self.touch();
        let mut chains = self.chains.lock().unwrap();
        let rules = chains.entry(Self::key(table, chain)).or_default();
        match rules.iter().position(|r| r == rule) {
            Some(at) => {
                rules.remove(at);
                Ok(())
            }
            None => Err(NetError::Command {
                cmd: format!("iptables -t {} -D {}", table, chain),
                stderr: "Bad rule (does a matching rule exist in that chain?)".to_string(),
            }),
        }
    }

    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        self.touch();
        Ok(self
            .rules(table, chain)
            .into_iter()
            .map(|r| format!("-A {} {}", chain, r))
            .collect())
    }

    async fn clear_and_delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.touch();
        self.chains
            .lock()
            .unwrap()
            .remove(&Self::key(table, chain))
            .map(|_| ())
            .ok_or_else(|| NetError::NotFound(chain.to_string()))
    }
}

pub struct FakeEbtables {
    rules: Mutex<Vec<String>>,
}

impl FakeEbtables {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, rule: &str) {
        self.rules.lock().unwrap().push(rule.to_string());
    }

    pub fn rules(&self) -> Vec<String> {
        self.rules.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ebtables for FakeEbtables {
    async fn list(&self, _table: &str, _chain: &str) -> Result<Vec<String>> {
        Ok(self.rules())
    }

    async fn insert(&self, _table: &str, _chain: &str, rule: &[String]) -> Result<()> {
        self.rules.lock().unwrap().insert(0, rule.join(" "));
        Ok(())
    }

    async fn delete(&self, _table: &str, _chain: &str, rule: &[String]) -> Result<()> {
        let line = rule.join(" ");
        self.rules.lock().unwrap().retain(|r| *r != line);
        Ok(())
    }
}

pub struct FakeSysctl {
    values: Mutex<BTreeMap<String, String>>,
}

impl FakeSysctl {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl Sysctl for FakeSysctl {
    async fn set(&self, key: &[&str], value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.join("/"), value.to_string());
        Ok(())
    }
}

pub struct FakeArp {
    sent: Mutex<Vec<(String, Ipv4Addr)>>,
}

impl FakeArp {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Ipv4Addr)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GratuitousArp for FakeArp {
    async fn announce(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        self.sent.lock().unwrap().push((device.to_string(), ip));
        Ok(())
    }
}

/// One of every fake, shareable with a [`HostNetwork`]
pub struct Fakes {
    pub links: Arc<FakeLinks>,
    pub routes: Arc<FakeRoutes>,
    pub iptables: Arc<FakeIptables>,
    pub ebtables: Arc<FakeEbtables>,
    pub sysctl: Arc<FakeSysctl>,
    pub arp: Arc<FakeArp>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            links: Arc::new(FakeLinks::new()),
            routes: Arc::new(FakeRoutes::new()),
            iptables: Arc::new(FakeIptables::new()),
            ebtables: Arc::new(FakeEbtables::new()),
            sysctl: Arc::new(FakeSysctl::new()),
            arp: Arc::new(FakeArp::new()),
        }
    }

    pub fn host(&self) -> HostNetwork {
        HostNetwork::from_parts(
            self.links.clone(),
            self.routes.clone(),
            self.iptables.clone(),
            self.ebtables.clone(),
            self.sysctl.clone(),
            self.arp.clone(),
            DEFAULT_VIRTUAL_IP,
        )
    }

    pub fn masquerade(&self) -> Masquerade<'_> {
        Masquerade {
            links: self.links.as_ref(),
            routes: self.routes.as_ref(),
            iptables: self.iptables.as_ref(),
            ebtables: self.ebtables.as_ref(),
            sysctl: self.sysctl.as_ref(),
            arp: self.arp.as_ref(),
            virtual_ip: DEFAULT_VIRTUAL_IP,
        }
    }
}
