use crate::gap::constants::*;
use std::fmt;

/// Address type of a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    LePublic,
    LeRandom,
    LePublicIdentity,
    LeRandomIdentity,
    Classic,
    LeAnonymous,
}

impl AddressType {
    /// Whether the address belongs to an LE transport
    pub fn is_le(&self) -> bool {
        !matches!(self, AddressType::Classic)
    }
}

impl TryFrom<u8> for AddressType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            REMOTE_ADDR_LE_PUBLIC => Ok(AddressType::LePublic),
            REMOTE_ADDR_LE_RANDOM => Ok(AddressType::LeRandom),
            REMOTE_ADDR_LE_PUBLIC_IDENTITY => Ok(AddressType::LePublicIdentity),
            REMOTE_ADDR_LE_RANDOM_IDENTITY => Ok(AddressType::LeRandomIdentity),
            REMOTE_ADDR_CLASSIC => Ok(AddressType::Classic),
            REMOTE_ADDR_LE_ANONYMOUS => Ok(AddressType::LeAnonymous),
            other => Err(other),
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::LePublic => REMOTE_ADDR_LE_PUBLIC,
            AddressType::LeRandom => REMOTE_ADDR_LE_RANDOM,
            AddressType::LePublicIdentity => REMOTE_ADDR_LE_PUBLIC_IDENTITY,
            AddressType::LeRandomIdentity => REMOTE_ADDR_LE_RANDOM_IDENTITY,
            AddressType::Classic => REMOTE_ADDR_CLASSIC,
            AddressType::LeAnonymous => REMOTE_ADDR_LE_ANONYMOUS,
        }
    }
}

/// Bluetooth device address, stored little-endian as it appears on air
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; BD_ADDR_LEN],
}

impl BdAddr {
    pub fn new(bytes: [u8; BD_ADDR_LEN]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; BD_ADDR_LEN] = slice.get(..BD_ADDR_LEN)?.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_type_codes() {
        assert_eq!(AddressType::try_from(0x10), Ok(AddressType::Classic));
        assert_eq!(u8::from(AddressType::LeRandom), 0x01);
        assert_eq!(AddressType::try_from(0x42), Err(0x42));
        assert!(AddressType::LeAnonymous.is_le());
        assert!(!AddressType::Classic.is_le());
    }

    #[test]
    fn test_bd_addr_display() {
        let addr = BdAddr::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(addr.to_string(), "06:05:04:03:02:01");
        assert_eq!(BdAddr::from_slice(&[1, 2, 3]), None);
        assert_eq!(BdAddr::from_slice(addr.as_slice()), Some(addr));
    }
}
