//! ECFC channel manager
//!
//! [`EcfcManager`] sits between protocol modules and the L2CAP transport.
//! It keeps the protocol registrations, the per-CID channel records and the
//! procedures still waiting for the transport, and it routes every event to
//! the callback of the protocol that owns it.
//!
//! Callbacks always run after the manager released its own locks, so a
//! callback may call back into the manager.

use crate::gap::{AddressType, BdAddr};
use crate::l2cap::channel::{BatchId, ChannelInfo, EcfcChannel};
use crate::l2cap::constants::*;
use crate::l2cap::event::*;
use crate::l2cap::psm::is_valid_psm;
use crate::l2cap::registry::{
    Admission, EcfcCallback, ProtocolTable, RegistrationState, SecurityTable,
};
use crate::l2cap::transport::{EcfcRequest, EcfcTransport};
use crate::l2cap::types::*;
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An event queued for delivery to one callback
type Notification = (EcfcCallback, EcfcEvent);

/// Which side started a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchRole {
    Initiator,
    Acceptor,
}

/// Channels requested or offered together
#[derive(Debug)]
struct Batch {
    proto_id: ProtoId,
    conn_handle: ConnHandle,
    role: BatchRole,
    cids: CidList,
    /// Order in which the batch became ready to complete; `None` while an
    /// offered batch waits for its final confirmation
    ready: Option<u64>,
}

/// A local connect request waiting for its connection response
#[derive(Debug)]
struct PendingConnect {
    proto_id: ProtoId,
    bd_addr: BdAddr,
    bd_type: AddressType,
    cid_num: u8,
    local_mtu: u16,
    config: EcfcConfig,
}

/// A started connect procedure whose CIDs only arrive with its completion
#[derive(Debug)]
struct UnassignedConnect {
    conn_handle: ConnHandle,
    request: PendingConnect,
}

/// Procedure a connection completion settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Batch(BatchId),
    Unassigned(u64),
}

/// A remote connection request waiting for the application's confirmation
#[derive(Debug)]
struct PendingIndication {
    proto_id: ProtoId,
    batch: BatchId,
    offered: CidList,
}

/// A local reconfiguration waiting for its response
#[derive(Debug)]
struct PendingReconfig {
    proto_id: ProtoId,
    cids: CidList,
    local_mtu: u16,
    local_mps: u16,
}

/// Channel records and outstanding procedures, guarded by one lock
#[derive(Default)]
struct LinkTable {
    channels: HashMap<(ConnHandle, ChannelId), EcfcChannel>,
    batches: BTreeMap<BatchId, Batch>,
    next_batch: BatchId,
    next_ready: u64,
    connects: VecDeque<PendingConnect>,
    unassigned: BTreeMap<u64, UnassignedConnect>,
    indications: HashMap<(ConnHandle, u16), PendingIndication>,
    reconfigs: HashMap<ConnHandle, PendingReconfig>,
}

impl LinkTable {
    fn allocate_batch(&mut self) -> BatchId {
        let id = self.next_batch;
        self.next_batch = self.next_batch.wrapping_add(1);
        id
    }

    fn next_ready(&mut self) -> u64 {
        let seq = self.next_ready;
        self.next_ready += 1;
        seq
    }

    /// Create a batch of `Connecting` channels
    fn open_batch(
        &mut self,
        proto_id: ProtoId,
        data_path: DataPath,
        conn_handle: ConnHandle,
        role: BatchRole,
        cids: CidList,
        local_mtu: u16,
        config: &EcfcConfig,
    ) -> BatchId {
        let batch = self.allocate_batch();
        let ready = match role {
            BatchRole::Initiator => Some(self.next_ready()),
            BatchRole::Acceptor => None,
        };
        for &cid in cids.iter() {
            let channel =
                EcfcChannel::new_connecting(cid, conn_handle, proto_id, data_path, batch, local_mtu, config);
            self.channels.insert((conn_handle, cid), channel);
        }
        self.batches.insert(
            batch,
            Batch {
                proto_id,
                conn_handle,
                role,
                cids,
                ready,
            },
        );
        batch
    }

    /// Forget a channel, returning failing acknowledgements for its unacknowledged sends
    fn release(&mut self, conn_handle: ConnHandle, cid: ChannelId) -> Option<(EcfcChannel, Vec<EcfcEvent>)> {
        let mut channel = self.channels.remove(&(conn_handle, cid))?;

        if let Some(batch) = self.batches.get_mut(&channel.batch()) {
            batch.cids.retain(|c| *c != cid);
            if batch.cids.is_empty() {
                self.batches.remove(&channel.batch());
            }
        }

        let acks: Vec<EcfcEvent> = (0..channel.take_outstanding())
            .map(|_| {
                EcfcEvent::DataRsp(DataRsp {
                    proto_id: channel.proto_id(),
                    conn_handle,
                    cid,
                    cause: ECFC_CAUSE_CHANNEL_RELEASED,
                    credits: channel.credits(),
                })
            })
            .collect();

        Some((channel, acks))
    }

    fn contains(&self, conn_handle: ConnHandle, cid: ChannelId) -> bool {
        self.channels.contains_key(&(conn_handle, cid))
    }

    fn batches_for<'a>(&'a self, info: &'a ConnCmplInfo) -> impl Iterator<Item = (BatchId, &'a Batch)> + 'a {
        self.batches
            .iter()
            .filter(move |(_, b)| b.conn_handle == info.conn_handle && b.proto_id == info.proto_id)
            .map(|(id, b)| (*id, b))
    }

    fn unassigned_for<'a>(&'a self, info: &'a ConnCmplInfo) -> impl Iterator<Item = u64> + 'a {
        self.unassigned
            .iter()
            .filter(move |(_, u)| u.request.proto_id == info.proto_id && u.request.bd_addr == info.bd_addr)
            .map(|(seq, _)| *seq)
    }

    /// Procedure a completion belongs to.
    ///
    /// A completion listing CIDs settles the batch holding any of them, or
    /// else the oldest connect still waiting for its CIDs. A completion
    /// without CIDs settles confirmed offered batches first, in confirmation
    /// order, then local requests in the order they started.
    fn completion_target(&self, info: &ConnCmplInfo) -> Option<Completion> {
        if !info.cids.is_empty() {
            return self
                .batches_for(info)
                .find(|(_, b)| b.cids.iter().any(|c| info.cids.contains(c)))
                .map(|(id, _)| Completion::Batch(id))
                .or_else(|| self.unassigned_for(info).next().map(Completion::Unassigned));
        }

        let acceptor = self
            .batches_for(info)
            .filter(|(_, b)| b.role == BatchRole::Acceptor)
            .filter_map(|(id, b)| b.ready.map(|seq| (seq, id)))
            .min()
            .map(|(_, id)| Completion::Batch(id));
        if acceptor.is_some() {
            return acceptor;
        }

        self.batches_for(info)
            .filter(|(_, b)| b.role == BatchRole::Initiator)
            .filter_map(|(id, b)| b.ready.map(|seq| (seq, Completion::Batch(id))))
            .chain(self.unassigned_for(info).map(|seq| (seq, Completion::Unassigned(seq))))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, target)| target)
    }
}

/// ECFC channel manager
pub struct EcfcManager {
    /// Transport the manager submits requests to
    transport: Arc<dyn EcfcTransport>,

    /// Protocol registrations, `None` until [`EcfcManager::init`]
    protocols: RwLock<Option<ProtocolTable>>,

    /// Protocol security entries
    security: Mutex<SecurityTable>,

    /// Global channel parameters
    config: Mutex<EcfcConfig>,

    /// Channels and outstanding procedures
    links: Mutex<LinkTable>,

    /// Locally synthesized events awaiting delivery
    deferred: Mutex<VecDeque<Notification>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

impl EcfcManager {
    /// Create a manager bound to a transport. [`EcfcManager::init`] must run before registrations.
    pub fn new(transport: Arc<dyn EcfcTransport>) -> Self {
        Self {
            transport,
            protocols: RwLock::new(None),
            security: Mutex::new(SecurityTable::new()),
            config: Mutex::new(EcfcConfig::default()),
            links: Mutex::new(LinkTable::default()),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    /// Size the protocol table. Only the first call succeeds.
    pub fn init(&self, max_protocols: u8) -> EcfcResult<()> {
        if max_protocols == 0 {
            return Err(EcfcError::InvalidParameter(
                "At least one protocol slot is required".into(),
            ));
        }

        let mut protocols = write(&self.protocols);
        if protocols.is_some() {
            return Err(EcfcError::AlreadyInitialized);
        }

        *protocols = Some(ProtocolTable::new(max_protocols as usize));
        info!("ECFC manager initialized with {} protocol slots", max_protocols);
        Ok(())
    }

    /// Set a global channel parameter. Applies to procedures started afterwards.
    pub fn set_param(&self, param: EcfcParam) -> EcfcResult<()> {
        lock(&self.config).apply(param)?;
        debug!("ECFC parameter 0x{:04X} set to {:?}", param.code(), param);
        Ok(())
    }

    pub fn config(&self) -> EcfcConfig {
        *lock(&self.config)
    }

    /// Register a protocol on a PSM.
    ///
    /// The returned id is used by every later operation of the protocol. The
    /// outcome arrives as a `ProtoRegRsp` event; a registration refused
    /// locally (duplicate PSM or full table) is reported the same way.
    pub fn register<F>(&self, psm: u16, callback: F, is_le: bool, data_path: DataPath) -> EcfcResult<ProtoId>
    where
        F: FnMut(&EcfcEvent) -> RcfgCfmCause + Send + 'static,
    {
        if !is_valid_psm(psm, is_le) {
            return Err(EcfcError::InvalidParameter(format!(
                "Invalid {} PSM 0x{:04X}",
                if is_le { "LE" } else { "BR/EDR" },
                psm
            )));
        }

        let callback: EcfcCallback = Arc::new(Mutex::new(callback));

        let mut protocols = write(&self.protocols);
        let table = protocols.as_mut().ok_or(EcfcError::NotInitialized)?;

        match table.admit(psm, is_le, data_path, callback.clone())? {
            Admission::Accepted(proto_id) => {
                let request = EcfcRequest::RegisterProtocol {
                    proto_id,
                    psm,
                    is_le,
                    data_path,
                };
                if let Err(e) = self.transport.submit(request) {
                    table.remove(proto_id);
                    return Err(e.into());
                }
                debug!("Registering protocol {} on PSM 0x{:04X} (LE: {})", proto_id, psm, is_le);
                Ok(proto_id)
            }
            Admission::Rejected(proto_id, cause) => {
                warn!(
                    "Refusing registration on PSM 0x{:04X} (LE: {}), cause 0x{:04X}",
                    psm, is_le, cause
                );
                let event = EcfcEvent::ProtoRegRsp(ProtoRegRsp {
                    is_le,
                    proto_id,
                    psm,
                    cause,
                });
                lock(&self.deferred).push_back((callback, event));
                Ok(proto_id)
            }
        }
    }

    /// Registration state of a protocol id
    pub fn registration_state(&self, proto_id: ProtoId) -> Option<RegistrationState> {
        read(&self.protocols)
            .as_ref()
            .and_then(|table| table.get(proto_id))
            .map(|reg| reg.state)
    }

    /// Register (`active`) or deregister the security entry of a PSM
    pub fn register_security(
        &self,
        is_le: bool,
        active: bool,
        psm: u16,
        uuid: u16,
        requirement: SecurityRequirement,
        key_size: u8,
    ) -> EcfcResult<()> {
        if !is_valid_psm(psm, is_le) {
            return Err(EcfcError::InvalidParameter(format!("Invalid PSM 0x{:04X}", psm)));
        }
        if active && !(ECFC_MIN_KEY_SIZE..=ECFC_MAX_KEY_SIZE).contains(&key_size) {
            return Err(EcfcError::InvalidParameter(format!(
                "Key size {} outside {}..={}",
                key_size, ECFC_MIN_KEY_SIZE, ECFC_MAX_KEY_SIZE
            )));
        }

        let mut security = lock(&self.security);
        self.transport.submit(EcfcRequest::RegisterSecurity {
            is_le,
            active,
            psm,
            uuid,
            requirement,
            key_size,
        })?;

        let entry = active.then_some(SecurityEntry {
            is_le,
            psm,
            uuid,
            requirement,
            key_size,
        });
        security.stage(is_le, psm, entry);
        debug!("Security entry for PSM 0x{:04X} (LE: {}) staged, active: {}", psm, is_le, active);
        Ok(())
    }

    /// Security entry currently in force for a PSM
    pub fn security_entry(&self, is_le: bool, psm: u16) -> Option<SecurityEntry> {
        lock(&self.security).get(is_le, psm)
    }

    /// Request `cid_count` channels to a remote device
    pub fn connect_request(
        &self,
        psm: u16,
        proto_id: ProtoId,
        local_mtu: u16,
        bd_addr: BdAddr,
        bd_type: AddressType,
        cid_count: u8,
    ) -> EcfcResult<()> {
        if cid_count == 0 || cid_count as usize > ECFC_CREATE_CHANN_MAX_NUM {
            return Err(EcfcError::InvalidParameter(format!(
                "Channel count {} outside 1..={}",
                cid_count, ECFC_CREATE_CHANN_MAX_NUM
            )));
        }
        if local_mtu < ECFC_MIN_MTU {
            return Err(EcfcError::InvalidParameter(format!(
                "Local MTU {} below {}",
                local_mtu, ECFC_MIN_MTU
            )));
        }

        {
            let protocols = read(&self.protocols);
            let table = protocols.as_ref().ok_or(EcfcError::NotInitialized)?;
            let reg = table.active(proto_id)?;
            if reg.psm != psm {
                return Err(EcfcError::InvalidParameter(format!(
                    "PSM 0x{:04X} does not belong to protocol {}",
                    psm, proto_id
                )));
            }
            if reg.is_le != bd_type.is_le() {
                return Err(EcfcError::InvalidParameter(
                    "Address type does not match the protocol transport".into(),
                ));
            }
        }

        let config = self.config();
        let mut links = lock(&self.links);
        self.transport.submit(EcfcRequest::Connect {
            proto_id,
            psm,
            local_mtu,
            local_mps: config.local_mps,
            init_credits: config.init_credits,
            bd_addr,
            bd_type,
            cid_num: cid_count,
        })?;

        links.connects.push_back(PendingConnect {
            proto_id,
            bd_addr,
            bd_type,
            cid_num: cid_count,
            local_mtu,
            config,
        });
        debug!(
            "Connecting {} channel(s) to {} on PSM 0x{:04X} for protocol {}",
            cid_count, bd_addr, psm, proto_id
        );
        Ok(())
    }

    /// Answer a remote connection request.
    ///
    /// `cids` lists the accepted channels and must be a subset of the ones
    /// offered in the indication. Pending causes keep the request open for a
    /// later final answer.
    pub fn send_conn_cfm(
        &self,
        conn_handle: ConnHandle,
        identity_id: u16,
        cause: ConnCfmCause,
        cids: &[ChannelId],
        local_mtu: u16,
    ) -> EcfcResult<()> {
        let config = self.config();
        let mut links = lock(&self.links);

        let key = (conn_handle, identity_id);
        let (proto_id, batch, offered) = match links.indications.get(&key) {
            Some(pending) => (pending.proto_id, pending.batch, pending.offered.clone()),
            None => return Err(EcfcError::UnknownIdentity(identity_id)),
        };

        if cause.is_accept() {
            let accepted = collect_cids(cids)?;
            if let Some(cid) = accepted.iter().find(|c| !offered.contains(c)) {
                return Err(EcfcError::InvalidParameter(format!(
                    "CID 0x{:04X} was not offered",
                    cid
                )));
            }
            if local_mtu < ECFC_MIN_MTU {
                return Err(EcfcError::InvalidParameter(format!(
                    "Local MTU {} below {}",
                    local_mtu, ECFC_MIN_MTU
                )));
            }

            self.transport.submit(EcfcRequest::ConnectConfirm {
                conn_handle,
                identity_id,
                cause,
                cids: accepted.clone(),
                local_mtu,
                local_mps: config.local_mps,
                init_credits: config.init_credits,
            })?;

            links.indications.remove(&key);
            for cid in offered.iter().filter(|c| !accepted.contains(c)) {
                links.release(conn_handle, *cid);
            }
            for cid in accepted.iter() {
                if let Some(channel) = links.channels.get_mut(&(conn_handle, *cid)) {
                    channel.set_local_mtu(local_mtu);
                }
            }
            let seq = links.next_ready();
            if let Some(entry) = links.batches.get_mut(&batch) {
                entry.ready = Some(seq);
            }
            debug!(
                "Protocol {} accepted {} of {} channel(s) for identity {} on handle 0x{:04X}",
                proto_id,
                accepted.len(),
                offered.len(),
                identity_id,
                conn_handle
            );
        } else {
            self.transport.submit(EcfcRequest::ConnectConfirm {
                conn_handle,
                identity_id,
                cause,
                cids: CidList::new(),
                local_mtu,
                local_mps: config.local_mps,
                init_credits: config.init_credits,
            })?;

            if cause.is_pending() {
                debug!("Connection request {} left pending ({:?})", identity_id, cause);
            } else {
                links.indications.remove(&key);
                for cid in offered.iter() {
                    links.release(conn_handle, *cid);
                }
                debug!("Rejected connection request {} ({:?})", identity_id, cause);
            }
        }

        Ok(())
    }

    /// Send one SDU on a connected channel
    pub fn send_data(&self, conn_handle: ConnHandle, cid: ChannelId, data: &[u8]) -> EcfcResult<()> {
        let mut links = lock(&self.links);
        let channel = links
            .channels
            .get_mut(&(conn_handle, cid))
            .ok_or(EcfcError::UnknownChannel { conn_handle, cid })?;

        if channel.data_path() != DataPath::App {
            return Err(EcfcError::DataPathNotApp);
        }
        channel.check_send(data.len())?;

        let frame = channel.build_frame(data);
        self.transport.submit(EcfcRequest::Data {
            conn_handle,
            cid,
            frame,
            offset: channel.ds_data_offset(),
        })?;
        channel.begin_send();

        trace!("Sent {} bytes on CID 0x{:04X}", data.len(), cid);
        Ok(())
    }

    /// Disconnect one channel
    pub fn disconnect_request(&self, conn_handle: ConnHandle, cid: ChannelId) -> EcfcResult<()> {
        let mut links = lock(&self.links);
        let channel = links
            .channels
            .get_mut(&(conn_handle, cid))
            .ok_or(EcfcError::UnknownChannel { conn_handle, cid })?;

        match channel.state() {
            ChannelState::Connected | ChannelState::Connecting => {}
            _ => return Err(EcfcError::InvalidState),
        }

        self.transport.submit(EcfcRequest::Disconnect { conn_handle, cid })?;
        channel.set_state(ChannelState::Disconnecting);

        debug!("Disconnecting CID 0x{:04X} on handle 0x{:04X}", cid, conn_handle);
        Ok(())
    }

    /// Change local MTU and MPS of connected channels sharing a link
    pub fn reconfigure_request(
        &self,
        conn_handle: ConnHandle,
        cids: &[ChannelId],
        local_mtu: u16,
        local_mps: u16,
    ) -> EcfcResult<()> {
        let list = collect_cids(cids)?;
        if local_mtu < ECFC_MIN_MTU {
            return Err(EcfcError::InvalidParameter(format!(
                "Local MTU {} below {}",
                local_mtu, ECFC_MIN_MTU
            )));
        }
        if !(ECFC_MIN_MPS..=ECFC_MAX_MPS).contains(&local_mps) {
            return Err(EcfcError::InvalidParameter(format!(
                "Local MPS {} outside {}..={}",
                local_mps, ECFC_MIN_MPS, ECFC_MAX_MPS
            )));
        }

        let mut links = lock(&self.links);
        if links.reconfigs.contains_key(&conn_handle) {
            return Err(EcfcError::Busy(conn_handle));
        }

        let mut proto_id = None;
        for &cid in list.iter() {
            let channel = links
                .channels
                .get(&(conn_handle, cid))
                .ok_or(EcfcError::UnknownChannel { conn_handle, cid })?;
            if channel.state() != ChannelState::Connected {
                return Err(EcfcError::InvalidState);
            }
            match proto_id {
                None => proto_id = Some(channel.proto_id()),
                Some(id) if id != channel.proto_id() => {
                    return Err(EcfcError::InvalidParameter(
                        "Channels belong to different protocols".into(),
                    ));
                }
                Some(_) => {}
            }
        }
        let proto_id = proto_id.ok_or_else(|| EcfcError::InvalidParameter("No channels".into()))?;

        self.transport.submit(EcfcRequest::Reconfigure {
            conn_handle,
            cids: list.clone(),
            local_mtu,
            local_mps,
        })?;
        links.reconfigs.insert(
            conn_handle,
            PendingReconfig {
                proto_id,
                cids: list,
                local_mtu,
                local_mps,
            },
        );

        debug!(
            "Reconfiguring {:?} on handle 0x{:04X} to MTU {} MPS {}",
            cids, conn_handle, local_mtu, local_mps
        );
        Ok(())
    }

    /// Feed one transport event into the manager.
    ///
    /// For a `ReconfigureInd` the returned cause is the answer the transport
    /// must send to the peer; every other event returns `None`.
    pub fn handle_event(&self, event: EcfcEvent) -> EcfcResult<Option<RcfgCfmCause>> {
        self.process_deferred();

        match event {
            EcfcEvent::ProtoRegRsp(rsp) => self.handle_proto_reg_rsp(rsp).map(|_| None),
            EcfcEvent::SecRegRsp(rsp) => self.handle_sec_reg_rsp(rsp).map(|_| None),
            EcfcEvent::ConnInd(ind) => self.handle_conn_ind(ind).map(|_| None),
            EcfcEvent::ConnRsp(rsp) => self.handle_conn_rsp(rsp).map(|_| None),
            EcfcEvent::ConnCmpl(info) => self.handle_conn_cmpl(info).map(|_| None),
            EcfcEvent::DataInd(ind) => self.handle_data_ind(ind).map(|_| None),
            EcfcEvent::DataRsp(rsp) => self.handle_data_rsp(rsp).map(|_| None),
            EcfcEvent::DisconnInd(ind) => self.handle_disconn_ind(ind).map(|_| None),
            EcfcEvent::DisconnRsp(rsp) => self.handle_disconn_rsp(rsp).map(|_| None),
            EcfcEvent::ReconfigureInd(ind) => self.handle_reconfigure_ind(ind).map(Some),
            EcfcEvent::ReconfigureRsp(rsp) => self.handle_reconfigure_rsp(rsp).map(|_| None),
        }
    }

    /// Deliver locally synthesized events, oldest first
    pub fn process_deferred(&self) {
        loop {
            let Some((callback, event)) = lock(&self.deferred).pop_front() else {
                break;
            };

            Self::deliver(&callback, &event);

            if let EcfcEvent::ProtoRegRsp(rsp) = &event {
                let mut protocols = write(&self.protocols);
                if let Some(table) = protocols.as_mut() {
                    let rejected = table
                        .get(rsp.proto_id)
                        .is_some_and(|reg| matches!(reg.state, RegistrationState::Rejected(_)));
                    if rejected {
                        table.remove(rsp.proto_id);
                    }
                }
            }
        }
    }

    /// Tear down every channel on a lost link.
    ///
    /// Each tracked channel gets a `DisconnInd` carrying `reason`, preceded by
    /// failing acknowledgements for its unacknowledged sends.
    pub fn handle_link_lost(&self, conn_handle: ConnHandle, reason: u16) -> EcfcResult<()> {
        self.process_deferred();

        let mut events = Vec::new();
        {
            let mut links = lock(&self.links);

            let mut cids: Vec<ChannelId> = links
                .channels
                .keys()
                .filter(|(handle, _)| *handle == conn_handle)
                .map(|(_, cid)| *cid)
                .collect();
            cids.sort_unstable();

            for cid in cids {
                if let Some((channel, acks)) = links.release(conn_handle, cid) {
                    events.extend(acks);
                    events.push(EcfcEvent::DisconnInd(DisconnInd {
                        proto_id: channel.proto_id(),
                        conn_handle,
                        cid,
                        cause: reason,
                    }));
                }
            }

            links.batches.retain(|_, b| b.conn_handle != conn_handle);
            links.indications.retain(|(handle, _), _| *handle != conn_handle);

            let lost: Vec<u64> = links
                .unassigned
                .iter()
                .filter(|(_, u)| u.conn_handle == conn_handle)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in lost {
                if let Some(unassigned) = links.unassigned.remove(&seq) {
                    let request = unassigned.request;
                    events.push(EcfcEvent::ConnCmpl(ConnCmplInfo {
                        proto_id: request.proto_id,
                        cause: reason,
                        conn_handle,
                        cids: CidList::new(),
                        remote_mtu: 0,
                        local_mtu: request.local_mtu,
                        local_mps: request.config.local_mps,
                        ds_data_offset: 0,
                        bd_addr: request.bd_addr,
                        bd_type: request.bd_type,
                    }));
                }
            }

            if let Some(pending) = links.reconfigs.remove(&conn_handle) {
                events.push(EcfcEvent::ReconfigureRsp(ReconfigureRsp {
                    proto_id: pending.proto_id,
                    cause: reason,
                    conn_handle,
                    cids: CidList::new(),
                    local_mtu: pending.local_mtu,
                    local_mps: pending.local_mps,
                }));
            }
        }

        info!(
            "Link 0x{:04X} lost (reason 0x{:04X}), {} event(s) synthesized",
            conn_handle,
            reason,
            events.len()
        );

        let notifications = self.route(events);
        self.notify(notifications);
        Ok(())
    }

    /// Snapshot of a tracked channel
    pub fn channel(&self, conn_handle: ConnHandle, cid: ChannelId) -> Option<ChannelInfo> {
        lock(&self.links).channels.get(&(conn_handle, cid)).map(|c| c.info())
    }

    /// State of a channel; untracked channels are `Disconnected`
    pub fn channel_state(&self, conn_handle: ConnHandle, cid: ChannelId) -> ChannelState {
        self.channel(conn_handle, cid)
            .map(|info| info.state)
            .unwrap_or(ChannelState::Disconnected)
    }

    /// Every tracked channel on a link, ordered by CID
    pub fn channels_on(&self, conn_handle: ConnHandle) -> Vec<ChannelInfo> {
        let links = lock(&self.links);
        let mut channels: Vec<ChannelInfo> = links
            .channels
            .values()
            .filter(|c| c.conn_handle() == conn_handle)
            .map(|c| c.info())
            .collect();
        channels.sort_by_key(|c| c.cid);
        channels
    }

    fn handle_proto_reg_rsp(&self, rsp: ProtoRegRsp) -> EcfcResult<()> {
        let callback = {
            let mut protocols = write(&self.protocols);
            let table = protocols.as_mut().ok_or(EcfcError::NotInitialized)?;
            let reg = table
                .get_mut(rsp.proto_id)
                .ok_or(EcfcError::ProtocolNotRegistered(rsp.proto_id))?;

            if reg.state != RegistrationState::Pending || reg.psm != rsp.psm || reg.is_le != rsp.is_le {
                warn!("Unexpected registration response for protocol {}", rsp.proto_id);
                return Err(EcfcError::ProtocolError(format!(
                    "No registration of protocol {} is outstanding",
                    rsp.proto_id
                )));
            }

            let callback = reg.callback.clone();
            if rsp.cause == GAP_SUCCESS {
                reg.state = RegistrationState::Active;
                info!("Protocol {} registered on PSM 0x{:04X}", rsp.proto_id, rsp.psm);
            } else {
                table.remove(rsp.proto_id);
                warn!(
                    "Registration of protocol {} failed, cause 0x{:04X}",
                    rsp.proto_id, rsp.cause
                );
            }
            callback
        };

        Self::deliver(&callback, &EcfcEvent::ProtoRegRsp(rsp));
        Ok(())
    }

    fn handle_sec_reg_rsp(&self, rsp: SecRegRsp) -> EcfcResult<()> {
        lock(&self.security).settle(rsp.is_le, rsp.psm, rsp.cause == GAP_SUCCESS);

        let callbacks = read(&self.protocols)
            .as_ref()
            .map(|table| table.callbacks_for(rsp.psm, rsp.is_le))
            .unwrap_or_default();
        if callbacks.is_empty() {
            debug!("No protocol on PSM 0x{:04X} for security response", rsp.psm);
        }

        let event = EcfcEvent::SecRegRsp(rsp);
        for callback in callbacks {
            Self::deliver(&callback, &event);
        }
        Ok(())
    }

    fn handle_conn_ind(&self, ind: ConnInd) -> EcfcResult<()> {
        let (data_path, callback) = self.active_protocol(ind.proto_id)?;
        let config = self.config();

        {
            let mut links = lock(&self.links);

            if ind.cids.is_empty() {
                return Err(EcfcError::ProtocolError("Connection indication without CIDs".into()));
            }

            let key = (ind.conn_handle, ind.identity_id);
            if links.indications.contains_key(&key) {
                warn!(
                    "Connection request {} on handle 0x{:04X} is already pending",
                    ind.identity_id, ind.conn_handle
                );
                return Err(EcfcError::ProtocolError(format!(
                    "Identity {} already pending",
                    ind.identity_id
                )));
            }

            let reused = ind.cids.iter().find(|c| links.contains(ind.conn_handle, **c)).copied();
            if let Some(cid) = reused {
                warn!(
                    "Refusing connection request {} on handle 0x{:04X}: CID 0x{:04X} in use",
                    ind.identity_id, ind.conn_handle, cid
                );
                self.transport.submit(EcfcRequest::ConnectConfirm {
                    conn_handle: ind.conn_handle,
                    identity_id: ind.identity_id,
                    cause: ConnCfmCause::InvalidParams,
                    cids: CidList::new(),
                    local_mtu: ECFC_MIN_MTU,
                    local_mps: config.local_mps,
                    init_credits: config.init_credits,
                })?;
                return Err(EcfcError::CidInUse(cid));
            }

            let batch = links.open_batch(
                ind.proto_id,
                data_path,
                ind.conn_handle,
                BatchRole::Acceptor,
                ind.cids.clone(),
                0,
                &config,
            );
            links.indications.insert(
                key,
                PendingIndication {
                    proto_id: ind.proto_id,
                    batch,
                    offered: ind.cids.clone(),
                },
            );
        }

        debug!(
            "Connection request {} from {} offering {:?}",
            ind.identity_id, ind.bd_addr, ind.cids
        );
        Self::deliver(&callback, &EcfcEvent::ConnInd(ind));
        Ok(())
    }

    fn handle_conn_rsp(&self, mut rsp: ConnRsp) -> EcfcResult<()> {
        let (data_path, callback) = self.active_protocol(rsp.proto_id)?;

        {
            let mut links = lock(&self.links);
            let position = links
                .connects
                .iter()
                .position(|p| p.proto_id == rsp.proto_id && p.bd_addr == rsp.bd_addr)
                .ok_or_else(|| {
                    warn!("Connection response without request for protocol {}", rsp.proto_id);
                    EcfcError::ProtocolError("Unexpected connection response".into())
                })?;
            let pending = links
                .connects
                .remove(position)
                .ok_or_else(|| EcfcError::ProtocolError("Unexpected connection response".into()))?;

            if rsp.cause == GAP_SUCCESS {
                if rsp.cids.len() > pending.cid_num as usize {
                    warn!(
                        "Transport assigned {} CIDs for {} requested channel(s)",
                        rsp.cids.len(),
                        pending.cid_num
                    );
                    rsp.cids.truncate(pending.cid_num as usize);
                }

                let conn_handle = rsp.conn_handle;
                rsp.cids.retain(|c| {
                    let in_use = links.contains(conn_handle, *c);
                    if in_use {
                        warn!("Dropping CID 0x{:04X} already in use on 0x{:04X}", c, conn_handle);
                    }
                    !in_use
                });

                if rsp.cids.is_empty() {
                    debug!("CIDs for protocol {} arrive with the completion", rsp.proto_id);
                    let seq = links.next_ready();
                    links.unassigned.insert(
                        seq,
                        UnassignedConnect {
                            conn_handle,
                            request: pending,
                        },
                    );
                } else {
                    links.open_batch(
                        rsp.proto_id,
                        data_path,
                        conn_handle,
                        BatchRole::Initiator,
                        rsp.cids.clone(),
                        pending.local_mtu,
                        &pending.config,
                    );
                }
            } else {
                rsp.cids.clear();
            }
        }

        debug!(
            "Connection response for protocol {}: cause 0x{:04X}, CIDs {:?}",
            rsp.proto_id, rsp.cause, rsp.cids
        );
        Self::deliver(&callback, &EcfcEvent::ConnRsp(rsp));
        Ok(())
    }

    fn handle_conn_cmpl(&self, mut info: ConnCmplInfo) -> EcfcResult<()> {
        let (data_path, callback) = self.active_protocol(info.proto_id)?;

        {
            let mut links = lock(&self.links);
            let target = links.completion_target(&info).ok_or_else(|| {
                warn!(
                    "Connection complete for unknown batch of protocol {} on 0x{:04X}",
                    info.proto_id, info.conn_handle
                );
                EcfcError::ProtocolError("Unexpected connection completion".into())
            })?;

            let batch_id = match target {
                Completion::Batch(id) => id,
                Completion::Unassigned(seq) => {
                    let request = links
                        .unassigned
                        .remove(&seq)
                        .map(|u| u.request)
                        .ok_or_else(|| EcfcError::ProtocolError("Unexpected connection completion".into()))?;

                    let mut assigned = CidList::new();
                    if info.cause == GAP_SUCCESS {
                        for cid in info.cids.iter() {
                            if assigned.len() == request.cid_num as usize {
                                warn!(
                                    "Completion lists more than the {} requested channel(s)",
                                    request.cid_num
                                );
                                break;
                            }
                            if assigned.contains(cid) || links.contains(info.conn_handle, *cid) {
                                warn!("Dropping CID 0x{:04X} already in use on 0x{:04X}", cid, info.conn_handle);
                                continue;
                            }
                            // Bounded by the requested count
                            let _ = assigned.push(*cid);
                        }
                    }

                    links.open_batch(
                        info.proto_id,
                        data_path,
                        info.conn_handle,
                        BatchRole::Initiator,
                        assigned,
                        request.local_mtu,
                        &request.config,
                    )
                }
            };
            let batch = links
                .batches
                .remove(&batch_id)
                .ok_or_else(|| EcfcError::ProtocolError("Unexpected connection completion".into()))?;
            links.indications.retain(|_, p| p.batch != batch_id);

            let mut established = CidList::new();
            if info.cause == GAP_SUCCESS {
                for cid in info.cids.iter() {
                    if batch.cids.contains(cid) {
                        // Both lists are bounded by the same capacity
                        let _ = established.push(*cid);
                    } else {
                        warn!("Ignoring CID 0x{:04X} outside the completed batch", cid);
                    }
                }
            }

            for cid in batch.cids.iter() {
                let key = (info.conn_handle, *cid);
                if established.contains(cid) {
                    if let Some(channel) = links.channels.get_mut(&key) {
                        channel.complete(info.local_mtu, info.local_mps, info.remote_mtu, info.ds_data_offset);
                    }
                } else if links
                    .channels
                    .get(&key)
                    .is_some_and(|c| c.state() == ChannelState::Connecting)
                {
                    links.channels.remove(&key);
                }
            }

            info!(
                "Batch on 0x{:04X} completed, cause 0x{:04X}, {} of {} channel(s) connected",
                info.conn_handle,
                info.cause,
                established.len(),
                batch.cids.len()
            );
            info.cids = established;
        }

        Self::deliver(&callback, &EcfcEvent::ConnCmpl(info));
        Ok(())
    }

    fn handle_data_ind(&self, ind: DataInd) -> EcfcResult<()> {
        let data_path = {
            let links = lock(&self.links);
            let channel = links.channels.get(&(ind.conn_handle, ind.cid)).ok_or_else(|| {
                warn!("Data for unknown CID 0x{:04X} on 0x{:04X}", ind.cid, ind.conn_handle);
                EcfcError::UnknownChannel {
                    conn_handle: ind.conn_handle,
                    cid: ind.cid,
                }
            })?;
            match channel.state() {
                ChannelState::Connected | ChannelState::Disconnecting => {}
                _ => return Err(EcfcError::InvalidState),
            }
            channel.data_path()
        };

        if data_path != DataPath::App {
            trace!("Data on CID 0x{:04X} belongs to the GATT data path", ind.cid);
            return Ok(());
        }
        if ind.payload().is_none() {
            return Err(EcfcError::ProtocolError(format!(
                "Data indication on CID 0x{:04X} overruns its buffer",
                ind.cid
            )));
        }

        let callback = self.protocol_callback(ind.proto_id)?;
        trace!("Received {} bytes on CID 0x{:04X}", ind.length, ind.cid);
        Self::deliver(&callback, &EcfcEvent::DataInd(ind));
        Ok(())
    }

    fn handle_data_rsp(&self, rsp: DataRsp) -> EcfcResult<()> {
        {
            let mut links = lock(&self.links);
            let acked = links
                .channels
                .get_mut(&(rsp.conn_handle, rsp.cid))
                .is_some_and(|channel| channel.ack_send(rsp.credits));
            if !acked {
                debug!("Dropping unmatched data response on CID 0x{:04X}", rsp.cid);
                return Ok(());
            }
        }

        let callback = self.protocol_callback(rsp.proto_id)?;
        Self::deliver(&callback, &EcfcEvent::DataRsp(rsp));
        Ok(())
    }

    fn handle_disconn_ind(&self, ind: DisconnInd) -> EcfcResult<()> {
        let acks = self.release_channel(ind.conn_handle, ind.cid)?;
        info!(
            "CID 0x{:04X} on 0x{:04X} disconnected by peer, cause 0x{:04X}",
            ind.cid, ind.conn_handle, ind.cause
        );

        let mut events = acks;
        events.push(EcfcEvent::DisconnInd(ind));
        let notifications = self.route(events);
        self.notify(notifications);
        Ok(())
    }

    fn handle_disconn_rsp(&self, rsp: DisconnRsp) -> EcfcResult<()> {
        if self.channel_state(rsp.conn_handle, rsp.cid) != ChannelState::Disconnecting {
            warn!("Disconnection response for CID 0x{:04X} not being disconnected", rsp.cid);
        }
        let acks = self.release_channel(rsp.conn_handle, rsp.cid)?;
        debug!("CID 0x{:04X} on 0x{:04X} disconnected", rsp.cid, rsp.conn_handle);

        let mut events = acks;
        events.push(EcfcEvent::DisconnRsp(rsp));
        let notifications = self.route(events);
        self.notify(notifications);
        Ok(())
    }

    fn handle_reconfigure_ind(&self, ind: ReconfigureInd) -> EcfcResult<RcfgCfmCause> {
        let acceptable = {
            let links = lock(&self.links);
            !ind.cids.is_empty()
                && ind.remote_mtu >= ECFC_MIN_MTU
                && ind.remote_mps >= ECFC_MIN_MPS
                && ind.cids.iter().all(|cid| {
                    links.channels.get(&(ind.conn_handle, *cid)).is_some_and(|c| {
                        c.state() == ChannelState::Connected && c.proto_id() == ind.proto_id
                    })
                })
        };
        if !acceptable {
            warn!(
                "Rejecting reconfiguration of {:?} on 0x{:04X}",
                ind.cids, ind.conn_handle
            );
            return Ok(RcfgCfmCause::UnacceptableParams);
        }

        let callback = match self.protocol_callback(ind.proto_id) {
            Ok(callback) => callback,
            Err(_) => return Ok(RcfgCfmCause::UnacceptableParams),
        };
        let event = EcfcEvent::ReconfigureInd(ind.clone());
        let cause = Self::deliver(&callback, &event);

        if cause == RcfgCfmCause::Accept {
            let mut links = lock(&self.links);
            for cid in ind.cids.iter() {
                if let Some(channel) = links.channels.get_mut(&(ind.conn_handle, *cid)) {
                    channel.reconfigure_remote(ind.remote_mtu, ind.remote_mps);
                }
            }
            debug!(
                "Peer reconfigured {:?} to MTU {} MPS {}",
                ind.cids, ind.remote_mtu, ind.remote_mps
            );
        }

        Ok(cause)
    }

    fn handle_reconfigure_rsp(&self, mut rsp: ReconfigureRsp) -> EcfcResult<()> {
        {
            let mut links = lock(&self.links);
            let pending = links.reconfigs.remove(&rsp.conn_handle).ok_or_else(|| {
                warn!("Reconfiguration response without request on 0x{:04X}", rsp.conn_handle);
                EcfcError::ProtocolError("Unexpected reconfiguration response".into())
            })?;
            if pending.proto_id != rsp.proto_id {
                warn!(
                    "Reconfiguration response for protocol {}, expected {}",
                    rsp.proto_id, pending.proto_id
                );
                rsp.proto_id = pending.proto_id;
            }

            let conn_handle = rsp.conn_handle;
            if rsp.cause == GAP_SUCCESS {
                rsp.cids.retain(|c| pending.cids.contains(c) && links.contains(conn_handle, *c));
                for cid in rsp.cids.iter() {
                    if let Some(channel) = links.channels.get_mut(&(conn_handle, *cid)) {
                        channel.reconfigure_local(rsp.local_mtu, rsp.local_mps);
                    }
                }
            } else {
                rsp.cids.clear();
            }
        }

        let callback = self.protocol_callback(rsp.proto_id)?;
        debug!(
            "Reconfiguration on 0x{:04X} finished, cause 0x{:04X}",
            rsp.conn_handle, rsp.cause
        );
        Self::deliver(&callback, &EcfcEvent::ReconfigureRsp(rsp));
        Ok(())
    }

    fn release_channel(&self, conn_handle: ConnHandle, cid: ChannelId) -> EcfcResult<Vec<EcfcEvent>> {
        let mut links = lock(&self.links);
        let (_, acks) = links.release(conn_handle, cid).ok_or_else(|| {
            warn!("Disconnection of unknown CID 0x{:04X} on 0x{:04X}", cid, conn_handle);
            EcfcError::UnknownChannel { conn_handle, cid }
        })?;

        for pending in links.indications.values_mut() {
            pending.offered.retain(|c| *c != cid);
        }
        links.indications.retain(|_, p| !p.offered.is_empty());

        Ok(acks)
    }

    /// Data path and callback of an active registration
    fn active_protocol(&self, proto_id: ProtoId) -> EcfcResult<(DataPath, EcfcCallback)> {
        let protocols = read(&self.protocols);
        let table = protocols.as_ref().ok_or(EcfcError::NotInitialized)?;
        let reg = table.active(proto_id).map_err(|e| {
            warn!("Event for inactive protocol {}", proto_id);
            e
        })?;
        Ok((reg.data_path, reg.callback.clone()))
    }

    fn protocol_callback(&self, proto_id: ProtoId) -> EcfcResult<EcfcCallback> {
        self.active_protocol(proto_id).map(|(_, callback)| callback)
    }

    /// Pair each event with the callback of its protocol, dropping orphans
    fn route(&self, events: Vec<EcfcEvent>) -> Vec<Notification> {
        let protocols = read(&self.protocols);
        let Some(table) = protocols.as_ref() else {
            return Vec::new();
        };

        events
            .into_iter()
            .filter_map(|event| {
                let proto_id = event.proto_id()?;
                match table.active(proto_id) {
                    Ok(reg) => Some((reg.callback.clone(), event)),
                    Err(_) => {
                        debug!("No callback for {:?} event of protocol {}", event.msg(), proto_id);
                        None
                    }
                }
            })
            .collect()
    }

    fn notify(&self, notifications: Vec<Notification>) {
        for (callback, event) in notifications {
            Self::deliver(&callback, &event);
        }
    }

    fn deliver(callback: &EcfcCallback, event: &EcfcEvent) -> RcfgCfmCause {
        let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
        (*callback)(event)
    }
}
