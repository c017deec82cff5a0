//! Source NAT and ARP-proxy rules for a masqueraded network
//!
//! Enabling installs, per device:
//! - proxy ARP with no delay, and IPv4 forwarding
//! - an ebtables FORWARD drop for ARP towards the floating gateway address,
//!   so proxied answers never leave the node
//! - a `<name>-POSTROUTING` nat chain, jumped to for the source CIDR, holding
//!   one ACCEPT per ignored destination ahead of the MASQUERADE rule
//!
//! and finally announces the floating address with a gratuitous ARP.

use std::net::Ipv4Addr;

use hostnet_api::MasqueradeSpec;
use tracing::{debug, info};

use crate::iptables::rule_args;
use crate::routes::egress_interface;
use crate::{Ebtables, GratuitousArp, Iptables, Links, Result, Routes, Sysctl};

const NAT_TABLE: &str = "nat";
const POSTROUTING: &str = "POSTROUTING";
const FILTER_TABLE: &str = "filter";
const FORWARD: &str = "FORWARD";

/// What to masquerade and where
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasqueradeRules {
    /// Keys the NAT chain `<name>-POSTROUTING`
    pub name: String,
    /// Device carrying the ARP proxy
    pub device: String,
    pub source: String,
    pub ignore: Vec<String>,
    /// Network whose route picks the SNAT output interface; empty for any
    pub egress_network: String,
}

impl MasqueradeRules {
    /// Rules keyed and proxied on the masquerade bridge
    pub fn from_spec(spec: &MasqueradeSpec) -> Self {
        Self {
            name: spec.bridge.clone(),
            device: spec.bridge.clone(),
            source: spec.source.clone(),
            ignore: spec.ignore.clone(),
            egress_network: spec.egress_network.clone(),
        }
    }
}

pub fn nat_chain(name: &str) -> String {
    format!("{}-{}", name, POSTROUTING)
}

fn arp_drop_rule(device: &str, virtual_ip: Ipv4Addr) -> Vec<String> {
    [
        "-p",
        "ARP",
        "--logical-out",
        device,
        "--arp-ip-dst",
        &virtual_ip.to_string(),
        "-j",
        "DROP",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub struct Masquerade<'a> {
    pub(crate) links: &'a dyn Links,
    pub(crate) routes: &'a dyn Routes,
    pub(crate) iptables: &'a dyn Iptables,
    pub(crate) ebtables: &'a dyn Ebtables,
    pub(crate) sysctl: &'a dyn Sysctl,
    pub(crate) arp: &'a dyn GratuitousArp,
    pub(crate) virtual_ip: Ipv4Addr,
}

impl Masquerade<'_> {
    pub async fn enable(&self, rules: &MasqueradeRules) -> Result<()> {
        let device = rules.device.as_str();

        self.sysctl
            .set(&["net", "ipv4", "conf", device, "proxy_arp"], "1")
            .await?;
        self.sysctl
            .set(&["net", "ipv4", "neigh", device, "proxy_delay"], "0")
            .await?;
        self.sysctl.set(&["net", "ipv4", "ip_forward"], "1").await?;

        let drop = arp_drop_rule(device, self.virtual_ip);
        let listed = self.ebtables.list(FILTER_TABLE, FORWARD).await?;
        if listed.iter().any(|line| *line == drop.join(" ")) {
            debug!(device, "ARP proxy rule already present");
        } else {
            self.ebtables.insert(FILTER_TABLE, FORWARD, &drop).await?;
            info!(device, rule = %drop.join(" "), "ARP proxy rule added");
        }

        self.install_nat(rules).await?;

        self.arp.announce(device, self.virtual_ip).await
    }

    async fn install_nat(&self, rules: &MasqueradeRules) -> Result<()> {
        let chain = nat_chain(&rules.name);

        let egress = if rules.egress_network.is_empty() {
            None
        } else {
            Some(egress_interface(self.links, self.routes, &rules.egress_network).await?)
        };

        if !self.iptables.chain_exists(NAT_TABLE, &chain).await? {
            self.iptables.new_chain(NAT_TABLE, &chain).await?;
        }

        let jump = args(&["-s", &rules.source, "-j", &chain]);
        self.insert_absent(POSTROUTING, &jump).await?;

        let masquerade = match &egress {
            Some(iface) => args(&["-o", iface, "-j", "MASQUERADE"]),
            None => args(&["-j", "MASQUERADE"]),
        };
        // Left over from an earlier egress setting
        for line in self.iptables.list(NAT_TABLE, &chain).await? {
            let rule = rule_args(&line);
            if rule.last().is_some_and(|target| target == "MASQUERADE") && rule != masquerade {
                self.iptables.delete(NAT_TABLE, &chain, &rule).await?;
                info!(chain = %chain, rule = %rule.join(" "), "Stale iptables rule removed");
            }
        }
        // MASQUERADE stays last; ACCEPTs go on top
        if !self.iptables.exists(NAT_TABLE, &chain, &masquerade).await? {
            self.iptables.append(NAT_TABLE, &chain, &masquerade).await?;
            info!(chain = %chain, rule = %masquerade.join(" "), "iptables rule added");
        }
        for destination in &rules.ignore {
            self.insert_absent(&chain, &args(&["-d", destination, "-j", "ACCEPT"]))
                .await?;
        }
        Ok(())
    }

    async fn insert_absent(&self, chain: &str, rule: &[String]) -> Result<()> {
        if self.iptables.exists(NAT_TABLE, chain, rule).await? {
            debug!(chain, rule = %rule.join(" "), "iptables rule already present");
            return Ok(());
        }
        self.iptables.insert(NAT_TABLE, chain, 1, rule).await?;
        info!(chain, rule = %rule.join(" "), "iptables rule added");
        Ok(())
    }

    /// Remove the ARP proxy rules for `device` and the `<name>-POSTROUTING` chain
    pub async fn delete(&self, name: &str, device: &str) -> Result<()> {
        for line in self.ebtables.list(FILTER_TABLE, FORWARD).await? {
            if line.split_whitespace().any(|token| token == device) {
                let rule = args(&line.split_whitespace().collect::<Vec<_>>());
                self.ebtables.delete(FILTER_TABLE, FORWARD, &rule).await?;
                info!(device, rule = %line, "ARP proxy rule removed");
            }
        }

        let chain = nat_chain(name);
        for line in self.iptables.list(NAT_TABLE, POSTROUTING).await? {
            if line.split_whitespace().any(|token| token == chain) {
                self.iptables
                    .delete(NAT_TABLE, POSTROUTING, &rule_args(&line))
                    .await?;
            }
        }

        if self.iptables.chain_exists(NAT_TABLE, &chain).await? {
            self.iptables.clear_and_delete_chain(NAT_TABLE, &chain).await?;
            info!(chain = %chain, "NAT chain removed");
        }
        Ok(())
    }
}
