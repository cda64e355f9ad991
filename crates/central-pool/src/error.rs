//! Error types for pool operations

use std::time::Duration;

/// Errors from pool and session cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every credential stayed leased for the whole wait
    #[error("no Central credential available after {}ms", waited.as_millis())]
    NoCredentialAvailable { waited: Duration },

    #[error("unknown credential: {0}")]
    UnknownCredential(u32),

    #[error("failed to open session transport: {0}")]
    Transport(#[from] transport::TransportError),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
