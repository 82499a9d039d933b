//! RustyECFC - L2CAP Enhanced Credit Based Flow Control channel management
//!
//! This library keeps track of ECFC channels for Bluetooth protocols such as
//! EATT. Protocols register on a PSM, open batches of up to five channels to
//! a peer or accept them from one, and exchange SDUs over them. The L2CAP
//! transport itself is supplied by the caller through [`l2cap::EcfcTransport`].

pub mod error;
pub mod gap;
pub mod l2cap;

// Re-export common types for convenience
pub use error::TransportError;
pub use gap::{AddressType, BdAddr};
pub use l2cap::{
    ChannelInfo, ChannelState, ConnCfmCause, DataPath, EcfcError, EcfcEvent, EcfcManager, EcfcParam,
    EcfcRequest, EcfcResult, EcfcTransport, RcfgCfmCause, PSM,
};
