//! Type definitions for L2CAP ECFC operations
//!
//! This module contains the identifiers, causes, parameters and security
//! records shared by the ECFC channel manager and its transport.

use super::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

/// Error types specific to ECFC operations
#[derive(Debug, Error)]
pub enum EcfcError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("ECFC manager is not initialized")]
    NotInitialized,

    #[error("ECFC manager is already initialized")]
    AlreadyInitialized,

    #[error("Protocol {0} is not registered")]
    ProtocolNotRegistered(ProtoId),

    #[error("Unknown channel 0x{cid:04X} on connection 0x{conn_handle:04X}")]
    UnknownChannel { conn_handle: ConnHandle, cid: ChannelId },

    #[error("Unknown connection indication identity 0x{0:04X}")]
    UnknownIdentity(u16),

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("Data length {len} exceeds local MTU {mtu}")]
    MtuExceeded { len: usize, mtu: u16 },

    #[error("Protocol data path is not handled by the application")]
    DataPathNotApp,

    #[error("A procedure is already outstanding on connection 0x{0:04X}")]
    Busy(ConnHandle),

    #[error("Channel 0x{0:04X} is still tracked")]
    CidInUse(ChannelId),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::error::TransportError),
}

/// Result type for ECFC operations
pub type EcfcResult<T> = std::result::Result<T, EcfcError>;

/// Protocol identifier assigned by the manager at registration
pub type ProtoId = u8;

/// Connection handle of the underlying ACL link
pub type ConnHandle = u16;

/// Local channel identifier assigned by the Bluetooth Host
pub type ChannelId = u16;

/// Bounded list of channel identifiers taking part in one procedure
pub type CidList = heapless::Vec<ChannelId, ECFC_CREATE_CHANN_MAX_NUM>;

/// Copy a slice of channel identifiers into a [`CidList`].
///
/// The slice must hold between one and five distinct identifiers.
pub fn collect_cids(cids: &[ChannelId]) -> EcfcResult<CidList> {
    if cids.is_empty() || cids.len() > ECFC_CREATE_CHANN_MAX_NUM {
        return Err(EcfcError::InvalidParameter(format!(
            "CID count {} out of range 1..={}",
            cids.len(),
            ECFC_CREATE_CHANN_MAX_NUM
        )));
    }

    let mut list = CidList::new();
    for &cid in cids {
        if list.contains(&cid) {
            return Err(EcfcError::InvalidParameter(format!("Duplicate CID 0x{:04X}", cid)));
        }
        // Capacity was checked above
        let _ = list.push(cid);
    }
    Ok(list)
}

/// ECFC channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Channel is not tracked
    Disconnected = ECFC_STATE_DISCONNECTED,
    /// Channel was requested or offered and awaits completion
    Connecting = ECFC_STATE_CONNECTING,
    /// Channel is open for data transfer
    Connected = ECFC_STATE_CONNECTED,
    /// Local disconnection is in progress
    Disconnecting = ECFC_STATE_DISCONNECTING,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Who handles the data of a registered protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPath {
    /// The application sends and receives data itself
    App,
    /// The ATT layer consumes the data
    Gatt,
}

impl TryFrom<u8> for DataPath {
    type Error = EcfcError;

    fn try_from(value: u8) -> EcfcResult<Self> {
        match value {
            ECFC_DATA_PATH_APP => Ok(DataPath::App),
            ECFC_DATA_PATH_GATT => Ok(DataPath::Gatt),
            other => Err(EcfcError::InvalidParameter(format!("Unknown data path {}", other))),
        }
    }
}

impl From<DataPath> for u8 {
    fn from(value: DataPath) -> Self {
        match value {
            DataPath::App => ECFC_DATA_PATH_APP,
            DataPath::Gatt => ECFC_DATA_PATH_GATT,
        }
    }
}

/// Confirmation cause for a remote ECFC connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ConnCfmCause {
    /// All connections accepted
    Accept = L2C_ECFC_ALL_CONN_SUCCESS,
    /// Some connections refused: insufficient resources
    NoResources = L2C_ERR | L2C_ECFC_CONN_RSP_SOME_CONN_NO_RESOURCES,
    /// All connections refused: unacceptable parameters
    UnacceptableParams = L2C_ERR | L2C_ECFC_CONN_RSP_ALL_CONN_UNACCEPTABLE_PARAMS,
    /// All connections refused: invalid parameters
    InvalidParams = L2C_ERR | L2C_ECFC_CONN_RSP_ALL_CONN_INVALID_PARAMS,
    /// All connections pending: no further information available
    PendingNoInfo = L2C_ERR | L2C_ECFC_CONN_RSP_ALL_CONN_PENDING_NO_INFO,
    /// All connections pending: authorization pending
    PendingAuthorization = L2C_ERR | L2C_ECFC_CONN_RSP_ALL_CONN_PENDING_AUTHOR,
}

impl ConnCfmCause {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Causes that establish the confirmed subset of channels
    pub fn is_accept(&self) -> bool {
        matches!(self, ConnCfmCause::Accept | ConnCfmCause::NoResources)
    }

    /// Causes that leave the request outstanding
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnCfmCause::PendingNoInfo | ConnCfmCause::PendingAuthorization)
    }

    /// Causes that refuse every offered channel
    pub fn is_reject(&self) -> bool {
        matches!(self, ConnCfmCause::UnacceptableParams | ConnCfmCause::InvalidParams)
    }
}

/// Confirmation cause for a remote reconfiguration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RcfgCfmCause {
    Accept = L2C_ECFC_ALL_CONN_SUCCESS,
    UnacceptableParams = L2C_ERR | L2C_ECFC_RCFG_RSP_UNACCEPTABLE_PARAMS,
}

impl RcfgCfmCause {
    pub fn code(&self) -> u16 {
        *self as u16
    }
}

/// Write-only manager tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcfcParam {
    /// Local initial credits granted to new channels
    InitCredits(u16),
    /// Local MPS offered by new channels
    LocalMps(u16),
}

impl EcfcParam {
    /// Parameter type code
    pub fn code(&self) -> u16 {
        match self {
            EcfcParam::InitCredits(_) => ECFC_PARAM_INIT_CREDITS,
            EcfcParam::LocalMps(_) => ECFC_PARAM_LOCAL_MPS,
        }
    }

    /// Decode a parameter from its type code and little-endian value
    pub fn from_raw(code: u16, value: &[u8]) -> EcfcResult<Self> {
        if value.len() != 2 {
            return Err(EcfcError::InvalidParameter(format!(
                "Parameter 0x{:04X} expects 2 octets, got {}",
                code,
                value.len()
            )));
        }
        let value = LittleEndian::read_u16(value);

        match code {
            ECFC_PARAM_INIT_CREDITS => Ok(EcfcParam::InitCredits(value)),
            ECFC_PARAM_LOCAL_MPS => Ok(EcfcParam::LocalMps(value)),
            other => Err(EcfcError::InvalidParameter(format!("Unknown parameter 0x{:04X}", other))),
        }
    }

    pub fn validate(&self) -> EcfcResult<()> {
        match *self {
            EcfcParam::InitCredits(0) => Err(EcfcError::InvalidParameter(
                "Initial credits must be at least 1".into(),
            )),
            EcfcParam::LocalMps(mps) if !(ECFC_MIN_MPS..=ECFC_MAX_MPS).contains(&mps) => {
                Err(EcfcError::InvalidParameter(format!("Local MPS {} out of range", mps)))
            }
            _ => Ok(()),
        }
    }
}

/// Defaults applied to channels created after they are set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcfcConfig {
    pub init_credits: u16,
    pub local_mps: u16,
}

impl Default for EcfcConfig {
    fn default() -> Self {
        Self {
            init_credits: ECFC_DEFAULT_INIT_CREDITS,
            local_mps: ECFC_DEFAULT_LOCAL_MPS,
        }
    }
}

impl EcfcConfig {
    pub fn apply(&mut self, param: EcfcParam) -> EcfcResult<()> {
        param.validate()?;
        match param {
            EcfcParam::InitCredits(credits) => self.init_credits = credits,
            EcfcParam::LocalMps(mps) => self.local_mps = mps,
        }
        Ok(())
    }
}

bitflags::bitflags! {
    /// Security properties a protocol requires before a channel may open
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityRequirement: u8 {
        const AUTHEN = ECFC_SEC_BIT_AUTHEN;
        const MITM = ECFC_SEC_BIT_MITM;
        const AUTHOR = ECFC_SEC_BIT_AUTHOR;
        const ENCRYPT = ECFC_SEC_BIT_ENCRYPT;
        const SC = ECFC_SEC_BIT_SC;
    }
}

/// Security state of a link, as known to the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSecurity {
    pub authenticated: bool,
    pub mitm: bool,
    pub authorized: bool,
    pub encrypted: bool,
    pub secure_connections: bool,
    pub key_size: u8,
}

/// Protocol security entry keyed by (is_le, psm)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityEntry {
    pub is_le: bool,
    pub psm: u16,
    pub uuid: u16,
    pub requirement: SecurityRequirement,
    pub key_size: u8,
}

impl SecurityEntry {
    /// Check whether a link satisfies this entry
    pub fn is_satisfied_by(&self, link: &LinkSecurity) -> bool {
        let req = self.requirement;
        let authen_ok = !req.contains(SecurityRequirement::AUTHEN) || link.authenticated;
        let mitm_ok = !req.contains(SecurityRequirement::MITM) || link.mitm;
        let author_ok = !req.contains(SecurityRequirement::AUTHOR) || link.authorized;
        let sc_ok = !req.contains(SecurityRequirement::SC) || link.secure_connections;

        // Any encryption requirement also bounds the key size
        let encrypt_ok = if req.contains(SecurityRequirement::ENCRYPT) {
            link.encrypted && link.key_size >= self.key_size
        } else {
            true
        };

        authen_ok && mitm_ok && author_ok && sc_ok && encrypt_ok
    }
}
