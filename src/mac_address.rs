//! Bluetooth device identity.
//!
//! Advertisers are keyed by their 48-bit hardware address. The type is
//! independent of any Bluetooth library so the aggregation core can be used
//! (and tested) without one.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mask selecting the 48 address bits of a platform `u64` address.
const ADDRESS_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// A 48-bit Bluetooth device address, most significant byte first.
///
/// Ordering is byte-lexicographic, which matches the numeric order of the
/// address; snapshots rely on this for a deterministic tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The address as the integer form used by some platform APIs.
    pub fn to_u64(self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }
}

/// Platform stacks often hand out addresses as a `u64`; only the low 48 bits
/// are significant.
impl From<u64> for MacAddress {
    fn from(value: u64) -> Self {
        let bytes = (value & ADDRESS_MASK).to_be_bytes();
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&bytes[2..]);
        Self(addr)
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let parts: Vec<&str> = s.trim().split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, (part, byte)) in parts.iter().zip(bytes.iter_mut()).enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex((*part).to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}
