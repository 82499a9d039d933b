//! Error types for the rustyecfc library
//!
//! This module defines the errors raised by the L2CAP transport that the
//! ECFC manager hands its requests to.

use thiserror::Error;

/// Errors that can occur when submitting a request to the L2CAP transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is not available")]
    Unavailable,
}
