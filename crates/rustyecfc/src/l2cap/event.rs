//! ECFC callback events
//!
//! Every response and indication exchanged between the transport, the
//! manager and the application is one variant of [`EcfcEvent`], each
//! carrying its own payload record.

use super::constants::*;
use super::types::*;
use crate::gap::{AddressType, BdAddr};

/// Message codes of the callback contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EcfcMsg {
    ProtoRegRsp = ECFC_MSG_PROTO_REG_RSP,
    SecRegRsp = ECFC_MSG_SEC_REG_RSP,
    ConnInd = ECFC_MSG_CONN_IND,
    ConnRsp = ECFC_MSG_CONN_RSP,
    ConnCmpl = ECFC_MSG_CONN_CMPL,
    DataInd = ECFC_MSG_DATA_IND,
    DataRsp = ECFC_MSG_DATA_RSP,
    DisconnInd = ECFC_MSG_DISCONN_IND,
    DisconnRsp = ECFC_MSG_DISCONN_RSP,
    ReconfigureInd = ECFC_MSG_RECONFIGURE_IND,
    ReconfigureRsp = ECFC_MSG_RECONFIGURE_RSP,
}

impl EcfcMsg {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Result of a protocol registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoRegRsp {
    pub is_le: bool,
    pub proto_id: ProtoId,
    pub psm: u16,
    pub cause: u16,
}

/// Result of a protocol security registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecRegRsp {
    pub is_le: bool,
    pub psm: u16,
    /// Whether the entry was being activated or deactivated
    pub active: bool,
    pub uuid: u16,
    pub cause: u16,
}

/// Remote request to establish a batch of channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInd {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub remote_mtu: u16,
    /// Local CIDs the host offers for the requested channels
    pub cids: CidList,
    pub bd_addr: BdAddr,
    pub bd_type: AddressType,
    /// Correlation token to pass back in the confirmation
    pub identity_id: u16,
}

/// Acknowledgement that a local connection procedure started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnRsp {
    pub proto_id: ProtoId,
    /// Number of channels requested
    pub cid_num: u8,
    pub cause: u16,
    pub bd_addr: BdAddr,
    pub bd_type: AddressType,
    pub conn_handle: ConnHandle,
    /// Local CIDs assigned by the host for the procedure
    pub cids: CidList,
}

/// Outcome of channel establishment on either side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnCmplInfo {
    pub proto_id: ProtoId,
    pub cause: u16,
    pub conn_handle: ConnHandle,
    /// Channels actually established
    pub cids: CidList,
    pub remote_mtu: u16,
    pub local_mtu: u16,
    pub local_mps: u16,
    /// Offset at which payload must be placed in a transmit buffer
    pub ds_data_offset: u16,
    pub bd_addr: BdAddr,
    pub bd_type: AddressType,
}

/// Data received on a channel
///
/// The payload starts `gap` octets into `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInd {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub cid: ChannelId,
    pub length: u16,
    pub gap: u16,
    pub data: Vec<u8>,
}

impl DataInd {
    /// The received payload, or `None` if `gap` and `length` overrun the buffer
    pub fn payload(&self) -> Option<&[u8]> {
        let start = self.gap as usize;
        let end = start.checked_add(self.length as usize)?;
        self.data.get(start..end)
    }
}

/// Acknowledgement of one local send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRsp {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub cid: ChannelId,
    pub cause: u16,
    /// Local credits remaining after the send
    pub credits: u16,
}

/// Remote disconnection of a channel, or a synthesized teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnInd {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub cid: ChannelId,
    pub cause: u16,
}

/// Result of a local disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnRsp {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub cid: ChannelId,
    pub cause: u16,
}

/// Remote request to reconfigure channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigureInd {
    pub proto_id: ProtoId,
    pub conn_handle: ConnHandle,
    pub cids: CidList,
    pub remote_mtu: u16,
    pub remote_mps: u16,
}

/// Result of a local reconfiguration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigureRsp {
    pub proto_id: ProtoId,
    pub cause: u16,
    pub conn_handle: ConnHandle,
    /// Channels successfully reconfigured
    pub cids: CidList,
    pub local_mtu: u16,
    pub local_mps: u16,
}

/// ECFC events delivered to registered protocol callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcfcEvent {
    ProtoRegRsp(ProtoRegRsp),
    SecRegRsp(SecRegRsp),
    ConnInd(ConnInd),
    ConnRsp(ConnRsp),
    ConnCmpl(ConnCmplInfo),
    DataInd(DataInd),
    DataRsp(DataRsp),
    DisconnInd(DisconnInd),
    DisconnRsp(DisconnRsp),
    ReconfigureInd(ReconfigureInd),
    ReconfigureRsp(ReconfigureRsp),
}

impl EcfcEvent {
    /// Message code of this event
    pub fn msg(&self) -> EcfcMsg {
        match self {
            EcfcEvent::ProtoRegRsp(_) => EcfcMsg::ProtoRegRsp,
            EcfcEvent::SecRegRsp(_) => EcfcMsg::SecRegRsp,
            EcfcEvent::ConnInd(_) => EcfcMsg::ConnInd,
            EcfcEvent::ConnRsp(_) => EcfcMsg::ConnRsp,
            EcfcEvent::ConnCmpl(_) => EcfcMsg::ConnCmpl,
            EcfcEvent::DataInd(_) => EcfcMsg::DataInd,
            EcfcEvent::DataRsp(_) => EcfcMsg::DataRsp,
            EcfcEvent::DisconnInd(_) => EcfcMsg::DisconnInd,
            EcfcEvent::DisconnRsp(_) => EcfcMsg::DisconnRsp,
            EcfcEvent::ReconfigureInd(_) => EcfcMsg::ReconfigureInd,
            EcfcEvent::ReconfigureRsp(_) => EcfcMsg::ReconfigureRsp,
        }
    }

    /// Protocol the event is addressed to. Security responses are keyed by PSM instead.
    pub fn proto_id(&self) -> Option<ProtoId> {
        match self {
            EcfcEvent::ProtoRegRsp(e) => Some(e.proto_id),
            EcfcEvent::SecRegRsp(_) => None,
            EcfcEvent::ConnInd(e) => Some(e.proto_id),
            EcfcEvent::ConnRsp(e) => Some(e.proto_id),
            EcfcEvent::ConnCmpl(e) => Some(e.proto_id),
            EcfcEvent::DataInd(e) => Some(e.proto_id),
            EcfcEvent::DataRsp(e) => Some(e.proto_id),
            EcfcEvent::DisconnInd(e) => Some(e.proto_id),
            EcfcEvent::DisconnRsp(e) => Some(e.proto_id),
            EcfcEvent::ReconfigureInd(e) => Some(e.proto_id),
            EcfcEvent::ReconfigureRsp(e) => Some(e.proto_id),
        }
    }
}
