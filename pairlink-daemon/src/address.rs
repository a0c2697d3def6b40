/*!
 * Device Addressing
 * MAC (BlueZ) and UUID (CoreBluetooth) identifiers
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How an adapter identifies remote devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressScheme {
    /// Six colon-separated octets, `AA:BB:CC:DD:EE:FF`.
    #[default]
    Mac,
    /// Platform-assigned peripheral identifier.
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    Mac([u8; 6]),
    Uuid(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("device address is missing")]
    Missing,
    #[error("device address is empty")]
    Empty,
    #[error("expected a MAC address like AA:BB:CC:DD:EE:FF, got {0:?}")]
    BadMac(String),
    #[error("expected a UUID, got {0:?}")]
    BadUuid(String),
    #[error("adapter cannot resolve {0}")]
    Unresolvable(String),
}

impl DeviceAddress {
    pub fn parse(input: &str, scheme: AddressScheme) -> Result<Self, AddressError> {
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        match scheme {
            AddressScheme::Mac => parse_mac(input)
                .map(DeviceAddress::Mac)
                .ok_or_else(|| AddressError::BadMac(input.to_string())),
            AddressScheme::Uuid => Uuid::parse_str(input)
                .map(DeviceAddress::Uuid)
                .map_err(|_| AddressError::BadUuid(input.to_string())),
        }
    }

    pub fn scheme(&self) -> AddressScheme {
        match self {
            DeviceAddress::Mac(_) => AddressScheme::Mac,
            DeviceAddress::Uuid(_) => AddressScheme::Uuid,
        }
    }
}

fn parse_mac(input: &str) -> Option<[u8; 6]> {
    if input.len() != 17 {
        return None;
    }

    let mut octets = [0u8; 6];
    let mut parts = input.split(':');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *octet = u8::from_str_radix(part, 16).ok()?;
    }

    // Exactly six groups
    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Mac(octets) => {
                let [a, b, c, d, e, g] = octets;
                write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
            }
            DeviceAddress::Uuid(uuid) => {
                let mut buf = Uuid::encode_buffer();
                f.write_str(uuid.hyphenated().encode_upper(&mut buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parses_either_case() {
        let upper = DeviceAddress::parse("AA:BB:CC:DD:EE:FF", AddressScheme::Mac).unwrap();
        let lower = DeviceAddress::parse("aa:bb:cc:dd:ee:ff", AddressScheme::Mac).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper, DeviceAddress::Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert_eq!(lower.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_empty_address_is_rejected() {
        assert_eq!(
            DeviceAddress::parse("", AddressScheme::Mac),
            Err(AddressError::Empty)
        );
        assert_eq!(
            DeviceAddress::parse("", AddressScheme::Uuid),
            Err(AddressError::Empty)
        );
    }

    #[test]
    fn test_malformed_macs_are_rejected() {
        for input in [
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA-BB-CC-DD-EE-FF",
            "AABBCCDDEEFF",
            "GG:BB:CC:DD:EE:FF",
            " AA:BB:CC:DD:EE:F",
            "+A:BB:CC:DD:EE:FF",
        ] {
            assert_eq!(
                DeviceAddress::parse(input, AddressScheme::Mac),
                Err(AddressError::BadMac(input.to_string())),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_uuid_scheme() {
        let address =
            DeviceAddress::parse("5c1f2e3a-0d4b-4a8e-9f61-2b7c3d4e5f60", AddressScheme::Uuid)
                .unwrap();
        assert_eq!(address.scheme(), AddressScheme::Uuid);
        assert_eq!(address.to_string(), "5C1F2E3A-0D4B-4A8E-9F61-2B7C3D4E5F60");
    }

    #[test]
    fn test_mac_is_not_a_uuid() {
        assert!(matches!(
            DeviceAddress::parse("AA:BB:CC:DD:EE:FF", AddressScheme::Uuid),
            Err(AddressError::BadUuid(_))
        ));
    }
}
