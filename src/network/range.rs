// src/network/range.rs

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::errors::{PunchclockError, Result};

/// One privileged IPv4 block.
///
/// Accepted spellings: CIDR (`163.23.0.0/16`), a single address
/// (`163.23.1.10`), or a dotted prefix with a trailing wildcard
/// (`163.23.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegedRange {
    network: u32,
    prefix_len: u8,
}

impl PrivilegedRange {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(PunchclockError::ConfigError(format!(
                "prefix length {prefix_len} is larger than 32"
            )));
        }
        let mask = mask(prefix_len);
        Ok(Self {
            network: u32::from(addr) & mask,
            prefix_len,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |why: &str| {
            PunchclockError::ConfigError(format!("invalid privileged range '{raw}': {why}"))
        };

        if let Some(prefix) = raw.strip_suffix(".*") {
            let octets: Vec<&str> = prefix.split('.').collect();
            if octets.is_empty() || octets.len() > 3 {
                return Err(invalid("wildcard form needs 1 to 3 leading octets"));
            }
            let mut bytes = [0u8; 4];
            for (slot, octet) in bytes.iter_mut().zip(&octets) {
                *slot = octet.parse().map_err(|_| invalid("octet is not 0-255"))?;
            }
            return Self::new(Ipv4Addr::from(bytes), (octets.len() * 8) as u8);
        }

        let (addr, len) = match raw.split_once('/') {
            Some((addr, len)) => (
                addr,
                len.parse::<u8>()
                    .map_err(|_| invalid("prefix length is not a number"))?,
            ),
            None => (raw, 32),
        };
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("not an IPv4 address"))?;
        Self::new(addr, len).map_err(|_| invalid("prefix length must be 0-32"))
    }

    pub fn parse_all(raw: &[String]) -> Result<Vec<Self>> {
        raw.iter().map(|r| Self::parse(r)).collect()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix_len) == self.network
    }

    /// True when any range contains `addr`.
    pub fn any_contains(ranges: &[Self], addr: Ipv4Addr) -> bool {
        ranges.iter().any(|r| r.contains(addr))
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl FromStr for PrivilegedRange {
    type Err = PunchclockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PrivilegedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix_len)
    }
}
