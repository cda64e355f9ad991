//! Error types for authentication operations

use transport::TransportError;

/// Errors from authenticating against the Central server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network-level failure while talking to `/sessions`; retryable
    #[error("session request failed: {0}")]
    Transport(#[from] TransportError),

    /// The server refused the configured email/password
    #[error("credential {credential_id} rejected ({status}): {body}")]
    Rejected {
        credential_id: u32,
        status: u16,
        body: String,
    },

    #[error("invalid session response: {0}")]
    InvalidResponse(String),

    #[error("session tracking store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Rejected { status, .. } => *status >= 500,
            Error::InvalidResponse(_) | Error::Store(_) => false,
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
