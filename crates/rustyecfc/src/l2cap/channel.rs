//! ECFC channel bookkeeping
//!
//! This module holds the per-CID record the manager keeps for every
//! channel between its creation in `Connecting` and its release.

use std::fmt;

use super::types::*;

/// Identifier of the batch a channel was created in
pub type BatchId = u32;

/// Snapshot of a tracked channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub cid: ChannelId,
    pub conn_handle: ConnHandle,
    pub proto_id: ProtoId,
    pub state: ChannelState,
    pub local_mtu: u16,
    pub local_mps: u16,
    pub remote_mtu: u16,
    pub remote_mps: u16,
    pub credits: u16,
    pub ds_data_offset: u16,
    /// Sends still waiting for their data response
    pub outstanding_sends: u16,
}

/// ECFC channel record
pub struct EcfcChannel {
    /// Local Channel Identifier (CID)
    local_cid: ChannelId,
    /// ACL link the channel rides on
    conn_handle: ConnHandle,
    /// Owning protocol registration
    proto_id: ProtoId,
    /// Data path of the owning registration
    data_path: DataPath,
    /// Batch the channel was requested or offered in
    batch: BatchId,
    /// Channel state
    state: ChannelState,
    /// Local MTU, which also bounds outgoing SDUs
    local_mtu: u16,
    /// Local MPS
    local_mps: u16,
    /// Remote MTU
    remote_mtu: u16,
    /// Remote MPS
    remote_mps: u16,
    /// Local credits as last reported by the transport
    credits: u16,
    /// Payload offset inside transmit buffers
    ds_data_offset: u16,
    /// Sends not yet acknowledged
    outstanding_sends: u16,
}

impl EcfcChannel {
    /// Create a channel in `Connecting` state
    pub fn new_connecting(
        local_cid: ChannelId,
        conn_handle: ConnHandle,
        proto_id: ProtoId,
        data_path: DataPath,
        batch: BatchId,
        local_mtu: u16,
        config: &EcfcConfig,
    ) -> Self {
        Self {
            local_cid,
            conn_handle,
            proto_id,
            data_path,
            batch,
            state: ChannelState::Connecting,
            local_mtu,
            local_mps: config.local_mps,
            remote_mtu: 0,
            remote_mps: 0,
            credits: config.init_credits,
            ds_data_offset: 0,
            outstanding_sends: 0,
        }
    }

    pub fn conn_handle(&self) -> ConnHandle {
        self.conn_handle
    }

    pub fn proto_id(&self) -> ProtoId {
        self.proto_id
    }

    pub fn data_path(&self) -> DataPath {
        self.data_path
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    pub fn local_mtu(&self) -> u16 {
        self.local_mtu
    }

    pub fn set_local_mtu(&mut self, local_mtu: u16) {
        self.local_mtu = local_mtu;
    }

    pub fn credits(&self) -> u16 {
        self.credits
    }

    /// Record the parameters negotiated at connection completion.
    ///
    /// A channel the application already started disconnecting stays
    /// `Disconnecting`.
    pub fn complete(&mut self, local_mtu: u16, local_mps: u16, remote_mtu: u16, ds_data_offset: u16) {
        self.local_mtu = local_mtu;
        self.local_mps = local_mps;
        self.remote_mtu = remote_mtu;
        self.ds_data_offset = ds_data_offset;
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Connected;
        }
    }

    /// Apply a locally requested reconfiguration
    pub fn reconfigure_local(&mut self, local_mtu: u16, local_mps: u16) {
        self.local_mtu = local_mtu;
        self.local_mps = local_mps;
    }

    /// Apply an accepted remote reconfiguration
    pub fn reconfigure_remote(&mut self, remote_mtu: u16, remote_mps: u16) {
        self.remote_mtu = remote_mtu;
        self.remote_mps = remote_mps;
    }

    /// Check that an SDU of `len` octets may be sent now.
    ///
    /// Outgoing SDUs are bounded by the local MTU.
    pub fn check_send(&self, len: usize) -> EcfcResult<()> {
        if self.state != ChannelState::Connected {
            return Err(EcfcError::InvalidState);
        }

        if len > self.local_mtu as usize {
            return Err(EcfcError::MtuExceeded {
                len,
                mtu: self.local_mtu,
            });
        }

        Ok(())
    }

    /// Build a transmit buffer with the payload placed at the data offset
    pub fn build_frame(&self, data: &[u8]) -> Vec<u8> {
        let offset = self.ds_data_offset as usize;
        let mut frame = vec![0u8; offset + data.len()];
        frame[offset..].copy_from_slice(data);
        frame
    }

    pub fn ds_data_offset(&self) -> u16 {
        self.ds_data_offset
    }

    /// Count a send handed to the transport
    pub fn begin_send(&mut self) {
        self.outstanding_sends = self.outstanding_sends.saturating_add(1);
    }

    /// Consume one outstanding send and record the remaining credits.
    ///
    /// Returns false if no send was outstanding.
    pub fn ack_send(&mut self, credits: u16) -> bool {
        if self.outstanding_sends == 0 {
            return false;
        }
        self.outstanding_sends -= 1;
        self.credits = credits;
        true
    }

    /// Drain the outstanding send counter, returning how many sends it held
    pub fn take_outstanding(&mut self) -> u16 {
        std::mem::take(&mut self.outstanding_sends)
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            cid: self.local_cid,
            conn_handle: self.conn_handle,
            proto_id: self.proto_id,
            state: self.state,
            local_mtu: self.local_mtu,
            local_mps: self.local_mps,
            remote_mtu: self.remote_mtu,
            remote_mps: self.remote_mps,
            credits: self.credits,
            ds_data_offset: self.ds_data_offset,
            outstanding_sends: self.outstanding_sends,
        }
    }
}

impl fmt::Debug for EcfcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcfcChannel")
            .field("local_cid", &self.local_cid)
            .field("conn_handle", &self.conn_handle)
            .field("proto_id", &self.proto_id)
            .field("data_path", &self.data_path)
            .field("batch", &self.batch)
            .field("state", &self.state)
            .field("local_mtu", &self.local_mtu)
            .field("remote_mtu", &self.remote_mtu)
            .field("credits", &self.credits)
            .field("outstanding_sends", &self.outstanding_sends)
            .finish()
    }
}
