//! Hardware address generation for virtual links.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Generate a random unicast, locally administered address.
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[..6]);
        // clear multicast bit, set locally-administered bit
        octets[0] = (octets[0] & 0xfe) | 0x02;
        Self(octets)
    }

    /// Raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the address is unicast and locally administered.
    pub fn is_local_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0 && self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Error returned when parsing a malformed hardware address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(String);

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_is_local_unicast() {
        for _ in 0..64 {
            assert!(MacAddress::generate().is_local_unicast());
        }
    }

    #[test]
    fn test_generated_differ() {
        assert_ne!(MacAddress::generate(), MacAddress::generate());
    }

    #[test]
    fn test_display_parses_back() {
        let mac = MacAddress::generate();
        let text = mac.to_string();
        assert_eq!(text.len(), 17);
        assert_eq!(text.parse::<MacAddress>().unwrap(), mac);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("02:00:00:00:00".parse::<MacAddress>().is_err());
        assert!("02:00:00:00:00:00:00".parse::<MacAddress>().is_err());
        assert!("zz:00:00:00:00:00".parse::<MacAddress>().is_err());
    }
}
