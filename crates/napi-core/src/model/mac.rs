use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 48-bit MAC address, stored as its integer value.
///
/// Stores key nic records by the decimal form of this integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddr(u64);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid MAC address {0:?}")]
pub struct InvalidMac(String);

impl MacAddr {
    pub const MAX: u64 = 0xFFFF_FFFF_FFFF;

    pub fn from_number(n: u64) -> Option<Self> {
        (n <= Self::MAX).then_some(Self(n))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Store key: the decimal integer.
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for MacAddr {
    type Err = InvalidMac;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-..` (single-digit octets allowed)
    /// and the bare 12-digit hex form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMac(s.to_owned());
        let s = s.trim();

        let octets: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else if s.len() == 12 {
            (0..6).filter_map(|i| s.get(i * 2..i * 2 + 2)).collect()
        } else {
            return Err(invalid());
        };

        if octets.len() != 6 {
            return Err(invalid());
        }

        octets.iter().try_fold(0_u64, |acc, octet| {
            let hex = octet.bytes().all(|b| b.is_ascii_hexdigit());
            if octet.is_empty() || octet.len() > 2 || !hex {
                return Err(invalid());
            }
            let byte = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
            Ok((acc << 8) | u64::from(byte))
        })
        .map(Self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_common_notations() {
        let colon: MacAddr = "90:b8:d0:c1:2e:0a".parse().unwrap();
        let dash: MacAddr = "90-B8-D0-C1-2E-0A".parse().unwrap();
        let bare: MacAddr = "90b8d0c12e0a".parse().unwrap();
        let short: MacAddr = "90:b8:d0:c1:2e:a".parse().unwrap();
        assert_eq!(colon, dash);
        assert_eq!(colon, bare);
        assert_eq!(colon, short);
        assert_eq!(colon.to_string(), "90:b8:d0:c1:2e:0a");
    }

    #[test]
    fn key_is_the_decimal_integer() {
        let mac: MacAddr = "00:00:00:00:01:00".parse().unwrap();
        assert_eq!(mac.key(), "256");
        assert_eq!(MacAddr::from_number(256), Some(mac));
        assert_eq!(MacAddr::from_number(MacAddr::MAX + 1), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!("00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("zz:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("001:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("+1:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("+90b8d0c12e0".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }
}
