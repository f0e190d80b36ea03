//! Client host allow-list carried by users.
//!
//! # Invariants
//! - IPv4-mapped IPv6 addresses are matched as their IPv4 form.
//! - An empty allow-list rejects every address.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

/// Network prefix such as `10.0.0.0/8` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpSubnet {
    prefix: IpAddr,
    prefix_len: u8,
}

impl IpSubnet {
    pub fn new(prefix: IpAddr, prefix_len: u8) -> Result<Self, HostPatternError> {
        let max_len = match prefix {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max_len {
            return Err(HostPatternError::InvalidPrefixLength {
                pattern: format!("{prefix}/{prefix_len}"),
                max_len,
            });
        }
        match (prefix, canonical(prefix)) {
            (IpAddr::V6(_), IpAddr::V4(mapped)) if prefix_len >= 96 => Ok(Self {
                prefix: IpAddr::V4(mapped),
                prefix_len: prefix_len - 96,
            }),
            _ => Ok(Self { prefix, prefix_len }),
        }
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        match (self.prefix, canonical(address)) {
            (IpAddr::V4(prefix), IpAddr::V4(address)) => {
                let mask = mask_u32(self.prefix_len);
                u32::from(prefix) & mask == u32::from(address) & mask
            }
            (IpAddr::V6(prefix), IpAddr::V6(address)) => {
                let mask = mask_u128(self.prefix_len);
                u128::from(prefix) & mask == u128::from(address) & mask
            }
            _ => false,
        }
    }
}

impl Display for IpSubnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.prefix, self.prefix_len)
    }
}

impl FromStr for IpSubnet {
    type Err = HostPatternError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (address, prefix_len) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| HostPatternError::InvalidPattern(value.to_string()))?;
        let address = address
            .parse::<IpAddr>()
            .map_err(|_| HostPatternError::InvalidPattern(value.to_string()))?;
        let prefix_len = prefix_len
            .parse::<u8>()
            .map_err(|_| HostPatternError::InvalidPattern(value.to_string()))?;
        Self::new(address, prefix_len)
    }
}

/// Set of client addresses a user may connect from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedClientHosts {
    #[serde(default)]
    any_host: bool,
    #[serde(default)]
    local_host: bool,
    #[serde(default)]
    addresses: BTreeSet<IpAddr>,
    #[serde(default)]
    subnets: BTreeSet<IpSubnet>,
}

impl AllowedClientHosts {
    /// Allow-list that accepts nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Allow-list that accepts every address.
    pub fn any() -> Self {
        Self {
            any_host: true,
            ..Self::default()
        }
    }

    pub fn add_any_host(&mut self) {
        self.any_host = true;
    }

    /// Accepts loopback addresses of both families.
    pub fn add_local_host(&mut self) {
        self.local_host = true;
    }

    pub fn add_address(&mut self, address: IpAddr) {
        self.addresses.insert(canonical(address));
    }

    pub fn add_subnet(&mut self, subnet: IpSubnet) {
        self.subnets.insert(subnet);
    }

    /// Adds one textual pattern: `any`, `localhost`, an address or a subnet.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), HostPatternError> {
        let trimmed = pattern.trim();
        match trimmed {
            "" => Err(HostPatternError::InvalidPattern(pattern.to_string())),
            "any" | "::/0" => {
                self.add_any_host();
                Ok(())
            }
            "localhost" | "local" => {
                self.add_local_host();
                Ok(())
            }
            value if value.contains('/') => {
                self.add_subnet(value.parse()?);
                Ok(())
            }
            value => {
                let address = value
                    .parse::<IpAddr>()
                    .map_err(|_| HostPatternError::InvalidPattern(pattern.to_string()))?;
                self.add_address(address);
                Ok(())
            }
        }
    }

    pub fn contains_any_host(&self) -> bool {
        self.any_host
    }

    pub fn is_empty(&self) -> bool {
        !self.any_host && !self.local_host && self.addresses.is_empty() && self.subnets.is_empty()
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        if self.any_host {
            return true;
        }
        let address = canonical(address);
        if self.local_host && address.is_loopback() {
            return true;
        }
        self.addresses.contains(&address) || self.subnets.iter().any(|net| net.contains(address))
    }
}

/// Host pattern parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPatternError {
    InvalidPattern(String),
    InvalidPrefixLength { pattern: String, max_len: u8 },
}

impl Display for HostPatternError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPattern(value) => write!(f, "invalid host pattern: `{value}`"),
            Self::InvalidPrefixLength { pattern, max_len } => {
                write!(f, "prefix length of `{pattern}` exceeds {max_len}")
            }
        }
    }
}

impl Error for HostPatternError {}

fn canonical(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        IpAddr::V4(_) => address,
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}
