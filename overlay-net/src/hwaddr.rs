//! 48-bit hardware (MAC) addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid hardware address: {0}")]
pub struct ParseHardwareAddrError(String);

/// An Ethernet hardware address, displayed as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    /// Random locally administered unicast address.
    pub fn random_local() -> Self {
        let mut bytes: [u8; 6] = rand::random();
        bytes[0] = (bytes[0] & 0xfe) | 0x02;
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareAddr {
    type Err = ParseHardwareAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseHardwareAddrError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseHardwareAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseHardwareAddrError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for HardwareAddr {
    type Error = ParseHardwareAddrError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| ParseHardwareAddrError(format!("{bytes:02x?}")))?;
        Ok(Self(octets))
    }
}

impl TryFrom<String> for HardwareAddr {
    type Error = ParseHardwareAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HardwareAddr> for String {
    fn from(addr: HardwareAddr) -> Self {
        addr.to_string()
    }
}
