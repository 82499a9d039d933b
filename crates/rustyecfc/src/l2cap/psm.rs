//! Protocol/Service Multiplexer (PSM) handling for L2CAP ECFC
//!
//! This module validates PSM values per transport and names the well-known ones.

use std::fmt;

/// Protocol/Service Multiplexer (PSM) values used in L2CAP.
///
/// LE transports use the 8-bit SPSM space, BR/EDR transports the
/// extensible odd-valued PSM space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum PSM {
    /// Service Discovery Protocol
    SDP,
    /// RFCOMM protocol
    RFCOMM,
    /// BNEP protocol
    BNEP,
    /// HID Control
    HID_CONTROL,
    /// HID Interrupt
    HID_INTERRUPT,
    /// AVCTP protocol
    AVCTP,
    /// AVDTP protocol
    AVDTP,
    /// AVCTP Browsing
    AVCTP_BROWSING,
    /// ATT protocol
    ATT,
    /// Enhanced ATT
    EATT,
    /// Any other value
    Other(u16),
}

impl PSM {
    /// Get the PSM value as u16
    pub fn value(&self) -> u16 {
        match self {
            PSM::SDP => 0x0001,
            PSM::RFCOMM => 0x0003,
            PSM::BNEP => 0x000F,
            PSM::HID_CONTROL => 0x0011,
            PSM::HID_INTERRUPT => 0x0013,
            PSM::AVCTP => 0x0017,
            PSM::AVDTP => 0x0019,
            PSM::AVCTP_BROWSING => 0x001B,
            PSM::ATT => 0x001F,
            PSM::EATT => 0x0027,
            PSM::Other(value) => *value,
        }
    }

    /// Name a raw PSM value
    pub fn from_value(value: u16) -> Self {
        match value {
            0x0001 => PSM::SDP,
            0x0003 => PSM::RFCOMM,
            0x000F => PSM::BNEP,
            0x0011 => PSM::HID_CONTROL,
            0x0013 => PSM::HID_INTERRUPT,
            0x0017 => PSM::AVCTP,
            0x0019 => PSM::AVDTP,
            0x001B => PSM::AVCTP_BROWSING,
            0x001F => PSM::ATT,
            0x0027 => PSM::EATT,
            other => PSM::Other(other),
        }
    }

    /// Check if the PSM is valid on the given transport
    pub fn is_valid(&self, is_le: bool) -> bool {
        is_valid_psm(self.value(), is_le)
    }
}

/// Check a raw PSM value against the rules of its transport.
///
/// LE SPSMs occupy 0x0001-0x00FF. BR/EDR PSMs must have an odd least
/// significant octet and an even most significant octet.
pub fn is_valid_psm(value: u16, is_le: bool) -> bool {
    if is_le {
        (0x0001..=0x00FF).contains(&value)
    } else {
        let lsb = value & 0x00FF;
        let msb = value >> 8;
        lsb % 2 == 1 && msb % 2 == 0
    }
}

impl fmt::Display for PSM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PSM::SDP => write!(f, "SDP (0x0001)"),
            PSM::RFCOMM => write!(f, "RFCOMM (0x0003)"),
            PSM::BNEP => write!(f, "BNEP (0x000F)"),
            PSM::HID_CONTROL => write!(f, "HID-Control (0x0011)"),
            PSM::HID_INTERRUPT => write!(f, "HID-Interrupt (0x0013)"),
            PSM::AVCTP => write!(f, "AVCTP (0x0017)"),
            PSM::AVDTP => write!(f, "AVDTP (0x0019)"),
            PSM::AVCTP_BROWSING => write!(f, "AVCTP-Browsing (0x001B)"),
            PSM::ATT => write!(f, "ATT (0x001F)"),
            PSM::EATT => write!(f, "EATT (0x0027)"),
            PSM::Other(value) => write!(f, "PSM (0x{:04X})", value),
        }
    }
}
