//! Network interface model

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sysinfo::Networks;

use crate::mac::MacAddress;

/// Administrative link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
    Unknown,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Up => "up",
            LinkStatus::Down => "down",
            LinkStatus::Unknown => "unknown",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up)
    }
}

impl std::str::FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(LinkStatus::Up),
            "down" => Ok(LinkStatus::Down),
            "unknown" => Ok(LinkStatus::Unknown),
            _ => Err(format!("Invalid link status: {}", s)),
        }
    }
}

/// A network interface as last reported by the OS.
///
/// Always re-queried; nothing caches these across operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Platform-native identifier (`eth0`, `en0`, adapter name on Windows)
    pub name: String,
    /// Current address; `None` for interfaces without one (tunnels)
    pub mac: Option<MacAddress>,
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, mac: Option<MacAddress>, status: LinkStatus) -> Self {
        Self {
            name: name.into(),
            mac,
            status,
            driver: None,
            description: None,
            ip_addresses: Vec::new(),
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.name == "lo"
            || self.name.starts_with("lo0")
            || self.name.to_lowercase().contains("loopback")
    }
}

/// IP addresses per interface name, as reported by sysinfo
pub fn ip_addresses_by_interface() -> HashMap<String, Vec<String>> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .map(|(name, data)| {
            let ips = data
                .ip_networks()
                .iter()
                .map(|ip| ip.addr.to_string())
                .collect();
            (name.clone(), ips)
        })
        .collect()
}

/// Fill `ip_addresses` from sysinfo for every listed interface
pub fn attach_ip_addresses(interfaces: &mut [NetworkInterface]) {
    let mut ips = ip_addresses_by_interface();
    for iface in interfaces.iter_mut() {
        if let Some(addrs) = ips.remove(&iface.name) {
            iface.ip_addresses = addrs;
        }
    }
}
