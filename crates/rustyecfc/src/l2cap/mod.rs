//! L2CAP Enhanced Credit Based Flow Control (ECFC) channel management
//!
//! This module provides the ECFC layer between protocol modules and the
//! L2CAP transport:
//! - Protocol and security registration per PSM
//! - Batched channel establishment in both directions
//! - Data transfer, disconnection and reconfiguration per channel
//! - Teardown of every channel when the underlying link is lost

pub mod channel;
pub mod constants;
pub mod core;
pub mod event;
pub mod psm;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export the public API
pub use self::channel::{ChannelInfo, EcfcChannel};
pub use self::core::EcfcManager;
pub use self::event::*;
pub use self::psm::{is_valid_psm, PSM};
pub use self::registry::{EcfcCallback, RegistrationState};
pub use self::transport::{EcfcRequest, EcfcTransport};
pub use self::types::*;
