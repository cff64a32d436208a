//! Interface filtering, search and sorting

use std::collections::BTreeMap;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SpoofError, SpoofResult};
use crate::generator;
use crate::interface::{LinkStatus, NetworkInterface};
use crate::mac::MacAddress;

/// Criteria applied to a listing. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceFilter {
    /// Case-insensitive substring of the name
    #[serde(default)]
    pub name: Option<String>,
    /// Regular expression over the name
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub status: Option<LinkStatus>,
    /// Case-insensitive substring of the driver
    #[serde(default)]
    pub driver: Option<String>,
    /// Case-insensitive substring of the vendor behind the address's OUI
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub has_ip: Option<bool>,
    #[serde(default)]
    pub exclude_loopback: bool,
}

impl InterfaceFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.regex.is_none()
            && self.status.is_none()
            && self.driver.is_none()
            && self.vendor.is_none()
            && self.has_ip.is_none()
            && !self.exclude_loopback
    }

    pub fn apply(&self, interfaces: Vec<NetworkInterface>) -> SpoofResult<Vec<NetworkInterface>> {
        let pattern = self
            .regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SpoofError::InvalidInput(format!("invalid interface regex: {}", e)))?;
        let name = self.name.as_ref().map(|n| n.to_lowercase());
        let driver = self.driver.as_ref().map(|d| d.to_lowercase());
        let vendor = self.vendor.as_ref().map(|v| v.to_lowercase());

        Ok(interfaces
            .into_iter()
            .filter(|iface| {
                if self.exclude_loopback && iface.is_loopback() {
                    return false;
                }
                if let Some(name) = &name {
                    if !iface.name.to_lowercase().contains(name) {
                        return false;
                    }
                }
                if let Some(re) = &pattern {
                    if !re.is_match(&iface.name) {
                        return false;
                    }
                }
                if let Some(status) = self.status {
                    if iface.status != status {
                        return false;
                    }
                }
                if let Some(driver) = &driver {
                    let matches = iface
                        .driver
                        .as_ref()
                        .map(|d| d.to_lowercase().contains(driver))
                        .unwrap_or(false);
                    if !matches {
                        return false;
                    }
                }
                if let Some(vendor) = &vendor {
                    let matches = iface
                        .mac
                        .as_ref()
                        .and_then(generator::vendor_of)
                        .map(|v| v.to_lowercase().contains(vendor))
                        .unwrap_or(false);
                    if !matches {
                        return false;
                    }
                }
                if let Some(has_ip) = self.has_ip {
                    if iface.ip_addresses.is_empty() == has_ip {
                        return false;
                    }
                }
                true
            })
            .collect())
    }
}

/// Free-text search over name, MAC, driver and description
pub fn search(interfaces: Vec<NetworkInterface>, keyword: &str) -> Vec<NetworkInterface> {
    let keyword = keyword.to_lowercase();
    interfaces
        .into_iter()
        .filter(|iface| {
            let mac = iface.mac.map(|m| m.to_string()).unwrap_or_default();
            let fields = [
                Some(iface.name.as_str()),
                Some(mac.as_str()),
                iface.driver.as_deref(),
                iface.description.as_deref(),
            ];
            let hit = fields
                .iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&keyword));
            hit
        })
        .collect()
}

/// Addresses carried by more than one interface, with the names carrying them
pub fn duplicate_macs(interfaces: &[NetworkInterface]) -> BTreeMap<MacAddress, Vec<String>> {
    let mut by_mac: BTreeMap<MacAddress, Vec<String>> = BTreeMap::new();
    for iface in interfaces {
        if let Some(mac) = iface.mac {
            by_mac.entry(mac).or_default().push(iface.name.clone());
        }
    }
    by_mac.retain(|_, names| names.len() > 1);
    by_mac
}

/// Listing order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Mac,
    Status,
    Driver,
    Vendor,
    Ip,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" => Ok(SortField::Name),
            "mac" | "mac_address" => Ok(SortField::Mac),
            "status" => Ok(SortField::Status),
            "driver" => Ok(SortField::Driver),
            "vendor" => Ok(SortField::Vendor),
            "ip" | "ip_address" => Ok(SortField::Ip),
            _ => Err(format!("Invalid sort field: {}", s)),
        }
    }
}

/// Stable sort; interfaces missing the field sort first
pub fn sort_by(interfaces: &mut [NetworkInterface], field: SortField, reverse: bool) {
    interfaces.sort_by(|a, b| {
        let ordering = match field {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Mac => a.mac.cmp(&b.mac),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::Driver => a.driver.cmp(&b.driver),
            SortField::Vendor => {
                let vendor = |i: &NetworkInterface| i.mac.as_ref().and_then(generator::vendor_of);
                vendor(a).cmp(&vendor(b))
            }
            SortField::Ip => a.ip_addresses.first().cmp(&b.ip_addresses.first()),
        };
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
}
