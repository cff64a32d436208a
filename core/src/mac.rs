//! MAC address value type and validation policy

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SpoofError, SpoofResult};
use crate::generator;

/// Accepted textual forms: colon, dash, bare and Cisco dotted notation
static MAC_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:[0-9a-f]{2}(?::[0-9a-f]{2}){5}|[0-9a-f]{2}(?:-[0-9a-f]{2}){5}|[0-9a-f]{12}|[0-9a-f]{4}\.[0-9a-f]{4}\.[0-9a-f]{4})$",
    )
    .expect("Invalid MAC grammar regex")
});

const MULTICAST_BIT: u8 = 0x01;
const LOCAL_BIT: u8 = 0x02;

/// Six-octet hardware address. Equality is byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & MULTICAST_BIT != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & LOCAL_BIT != 0
    }

    pub fn is_universal(&self) -> bool {
        !self.is_locally_administered()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Upper-case form without separators, as the Windows `NetworkAddress`
    /// registry keyword expects it
    pub fn to_registry_value(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Dash separated upper-case form, as `Get-NetAdapter` reports it
    pub fn to_dashed_upper(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = SpoofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !MAC_GRAMMAR.is_match(trimmed) {
            return Err(SpoofError::invalid(format!("malformed MAC address: '{}'", s)));
        }

        let hex: String = trimmed.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| SpoofError::invalid(format!("malformed MAC address '{}': {}", s, e)))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = SpoofError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// Summary of an address for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacReport {
    pub mac: MacAddress,
    pub vendor: Option<String>,
    pub unicast: bool,
    pub locally_administered: bool,
}

/// Policy applied to addresses before they reach a backend
#[derive(Debug, Clone)]
pub struct MacValidator {
    /// Reject multicast and broadcast addresses
    pub require_unicast: bool,
    /// Reject universally administered addresses whose OUI is not in the vendor table
    pub require_known_vendor: bool,
}

impl Default for MacValidator {
    fn default() -> Self {
        Self {
            require_unicast: true,
            require_known_vendor: false,
        }
    }
}

impl MacValidator {
    pub fn new(require_known_vendor: bool) -> Self {
        Self {
            require_known_vendor,
            ..Self::default()
        }
    }

    /// Parse text and apply the policy
    pub fn validate(&self, text: &str) -> SpoofResult<MacAddress> {
        let mac: MacAddress = text.parse()?;
        self.check(&mac)?;
        Ok(mac)
    }

    /// Apply the policy to an already parsed address
    pub fn check(&self, mac: &MacAddress) -> SpoofResult<()> {
        if mac.is_zero() {
            return Err(SpoofError::invalid("all-zero MAC address is not assignable"));
        }
        if self.require_unicast && mac.is_multicast() {
            return Err(SpoofError::invalid(format!(
                "{} is a multicast address; interfaces need a unicast address",
                mac
            )));
        }
        if self.require_known_vendor
            && mac.is_universal()
            && generator::vendor_of(mac).is_none()
        {
            return Err(SpoofError::invalid(format!(
                "{} has an unknown vendor prefix {:02x}:{:02x}:{:02x}",
                mac,
                mac.0[0],
                mac.0[1],
                mac.0[2]
            )));
        }
        Ok(())
    }

    pub fn describe(&self, mac: &MacAddress) -> MacReport {
        MacReport {
            mac: *mac,
            vendor: generator::vendor_of(mac).map(str::to_string),
            unicast: mac.is_unicast(),
            locally_administered: mac.is_locally_administered(),
        }
    }
}
