//! Protocol and security registration tables
//!
//! The protocol table binds one callback to each (psm, transport) pair and
//! hands out the protocol ids used to correlate events. The security table
//! holds the per-PSM requirements the transport checks before it lets a
//! channel open.

use super::constants::*;
use super::event::EcfcEvent;
use super::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Callback bound to a protocol registration.
///
/// The returned cause is only consulted for reconfiguration indications.
pub type EcfcCallback = Arc<Mutex<dyn FnMut(&EcfcEvent) -> RcfgCfmCause + Send + 'static>>;

/// Lifecycle of a protocol registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting for the transport's registration response
    Pending,
    /// Registered with the transport
    Active,
    /// Refused locally; kept until the failure response is delivered
    Rejected(u16),
}

/// A registered protocol
#[derive(Clone)]
pub struct ProtocolRegistration {
    pub proto_id: ProtoId,
    pub psm: u16,
    pub is_le: bool,
    pub data_path: DataPath,
    pub callback: EcfcCallback,
    pub state: RegistrationState,
}

impl ProtocolRegistration {
    fn is_live(&self) -> bool {
        !matches!(self.state, RegistrationState::Rejected(_))
    }
}

/// Outcome of admitting a registration into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Entry is pending; the request goes to the transport
    Accepted(ProtoId),
    /// Entry was refused with the given cause
    Rejected(ProtoId, u16),
}

/// Table of protocol registrations
pub struct ProtocolTable {
    capacity: usize,
    entries: HashMap<ProtoId, ProtocolRegistration>,
    next_id: ProtoId,
}

impl ProtocolTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    fn live_count(&self) -> usize {
        self.entries.values().filter(|r| r.is_live()).count()
    }

    /// Allocate a protocol id not currently in the table
    fn allocate_id(&mut self) -> EcfcResult<ProtoId> {
        let starting_id = self.next_id;

        loop {
            let candidate = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);

            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }

            if self.next_id == starting_id {
                return Err(EcfcError::ProtocolError("No protocol id available".into()));
            }
        }
    }

    /// Find the live registration for a (psm, transport) pair
    pub fn find(&self, psm: u16, is_le: bool) -> Option<&ProtocolRegistration> {
        self.entries
            .values()
            .find(|r| r.is_live() && r.psm == psm && r.is_le == is_le)
    }

    /// Admit a new registration.
    ///
    /// Duplicates and registrations beyond capacity still receive an id, so
    /// their failure can be reported through the callback, but never touch
    /// existing entries.
    pub fn admit(
        &mut self,
        psm: u16,
        is_le: bool,
        data_path: DataPath,
        callback: EcfcCallback,
    ) -> EcfcResult<Admission> {
        let refusal = if self.find(psm, is_le).is_some() {
            Some(ECFC_CAUSE_PSM_ALREADY_REGISTERED)
        } else if self.live_count() >= self.capacity {
            Some(ECFC_CAUSE_NO_RESOURCES)
        } else {
            None
        };

        let proto_id = self.allocate_id()?;
        let state = match refusal {
            Some(cause) => RegistrationState::Rejected(cause),
            None => RegistrationState::Pending,
        };

        self.entries.insert(
            proto_id,
            ProtocolRegistration {
                proto_id,
                psm,
                is_le,
                data_path,
                callback,
                state,
            },
        );

        Ok(match refusal {
            Some(cause) => Admission::Rejected(proto_id, cause),
            None => Admission::Accepted(proto_id),
        })
    }

    pub fn get(&self, proto_id: ProtoId) -> Option<&ProtocolRegistration> {
        self.entries.get(&proto_id)
    }

    pub fn get_mut(&mut self, proto_id: ProtoId) -> Option<&mut ProtocolRegistration> {
        self.entries.get_mut(&proto_id)
    }

    pub fn remove(&mut self, proto_id: ProtoId) -> Option<ProtocolRegistration> {
        self.entries.remove(&proto_id)
    }

    /// Look up an active registration
    pub fn active(&self, proto_id: ProtoId) -> EcfcResult<&ProtocolRegistration> {
        match self.entries.get(&proto_id) {
            Some(reg) if reg.state == RegistrationState::Active => Ok(reg),
            _ => Err(EcfcError::ProtocolNotRegistered(proto_id)),
        }
    }

    /// Callbacks of every live registration for a (psm, transport) pair
    pub fn callbacks_for(&self, psm: u16, is_le: bool) -> Vec<EcfcCallback> {
        self.entries
            .values()
            .filter(|r| r.is_live() && r.psm == psm && r.is_le == is_le)
            .map(|r| r.callback.clone())
            .collect()
    }
}

/// Security state of one (is_le, psm) pair
#[derive(Debug, Default)]
struct SecuritySlot {
    /// Value confirmed by the transport
    committed: Option<SecurityEntry>,
    /// Requested values, oldest first, each waiting for its response
    outstanding: VecDeque<Option<SecurityEntry>>,
}

impl SecuritySlot {
    fn current(&self) -> Option<SecurityEntry> {
        self.outstanding.back().copied().unwrap_or(self.committed)
    }
}

/// Table of protocol security entries keyed by (is_le, psm).
///
/// Requests take effect immediately. Responses arrive in request order, and
/// a failed one leaves the last confirmed value in place unless a later
/// request is still outstanding.
#[derive(Default)]
pub struct SecurityTable {
    slots: HashMap<(bool, u16), SecuritySlot>,
}

impl SecurityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, is_le: bool, psm: u16) -> Option<SecurityEntry> {
        self.slots.get(&(is_le, psm)).and_then(SecuritySlot::current)
    }

    /// Activate or deactivate an entry until its response arrives
    pub fn stage(&mut self, is_le: bool, psm: u16, entry: Option<SecurityEntry>) {
        self.slots.entry((is_le, psm)).or_default().outstanding.push_back(entry);
    }

    /// Settle the oldest outstanding registration for the pair
    pub fn settle(&mut self, is_le: bool, psm: u16, success: bool) {
        let key = (is_le, psm);
        let Some(slot) = self.slots.get_mut(&key) else {
            return;
        };
        if let Some(requested) = slot.outstanding.pop_front() {
            if success {
                slot.committed = requested;
            }
        }
        if slot.committed.is_none() && slot.outstanding.is_empty() {
            self.slots.remove(&key);
        }
    }
}
