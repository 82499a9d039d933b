//! Boundary between the ECFC manager and the L2CAP transport
//!
//! The manager never touches the wire. It submits [`EcfcRequest`]s to an
//! [`EcfcTransport`] and is fed [`EcfcEvent`](super::event::EcfcEvent)s
//! back through `EcfcManager::handle_event`.

use super::types::*;
use crate::error::TransportError;
use crate::gap::{AddressType, BdAddr};

/// Requests the manager hands to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcfcRequest {
    /// Register a protocol over L2CAP
    RegisterProtocol {
        proto_id: ProtoId,
        psm: u16,
        is_le: bool,
        data_path: DataPath,
    },

    /// Register or deregister a protocol security entry
    RegisterSecurity {
        is_le: bool,
        active: bool,
        psm: u16,
        uuid: u16,
        requirement: SecurityRequirement,
        key_size: u8,
    },

    /// Start establishing a batch of channels
    Connect {
        proto_id: ProtoId,
        psm: u16,
        local_mtu: u16,
        local_mps: u16,
        init_credits: u16,
        bd_addr: BdAddr,
        bd_type: AddressType,
        cid_num: u8,
    },

    /// Answer a remote connection request
    ConnectConfirm {
        conn_handle: ConnHandle,
        identity_id: u16,
        cause: ConnCfmCause,
        cids: CidList,
        local_mtu: u16,
        local_mps: u16,
        init_credits: u16,
    },

    /// Send one SDU; the payload starts `offset` octets into `frame`
    Data {
        conn_handle: ConnHandle,
        cid: ChannelId,
        frame: Vec<u8>,
        offset: u16,
    },

    /// Disconnect one channel
    Disconnect {
        conn_handle: ConnHandle,
        cid: ChannelId,
    },

    /// Reconfigure MTU and MPS of channels sharing a connection
    Reconfigure {
        conn_handle: ConnHandle,
        cids: CidList,
        local_mtu: u16,
        local_mps: u16,
    },
}

/// An L2CAP transport able to carry ECFC procedures.
///
/// `submit` only queues the request. Results come back later as events.
/// Implementations must not call back into the manager from `submit`,
/// since the manager holds its channel table lock while submitting.
pub trait EcfcTransport: Send + Sync {
    fn submit(&self, request: EcfcRequest) -> Result<(), TransportError>;
}
