//! GAP address types shared by the L2CAP layer

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
