//! Error taxonomy for Central operations

use std::time::Duration;

use transport::TransportError;

/// Errors surfaced by the executor and the business operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every credential stayed leased for the whole acquire timeout
    #[error("system busy: no Central credential available after {}ms", waited.as_millis())]
    NoCredentialAvailable { waited: Duration },

    /// Central refused a configured service account
    #[error("Central rejected credential {credential_id} ({status}): {message}")]
    AuthenticationFailed {
        credential_id: u32,
        status: u16,
        message: String,
    },

    #[error("permission denied: {actor} may not {action}")]
    PermissionDenied { actor: String, action: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden by Central: {0}")]
    Forbidden(String),

    #[error("invalid response from Central: {0}")]
    InvalidResponse(String),

    /// `last` is the final transient failure
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// A compensating action failed; manual cleanup is needed
    #[error("rollback failed ({rollback}) after: {original}")]
    RollbackFailed {
        original: Box<Error>,
        rollback: Box<Error>,
    },

    /// Any other non-success status from Central
    #[error("Central returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("local store error: {0}")]
    Store(String),
}

impl Error {
    /// Stable name used in error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoCredentialAvailable { .. } => "no_credential_available",
            Error::AuthenticationFailed { .. } => "authentication_failed",
            Error::PermissionDenied { .. } => "permission_denied",
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::InvalidResponse(_) => "invalid_response",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::RollbackFailed { .. } => "rollback_failed",
            Error::Status { .. } => "upstream_status",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::Transport(_) => "transport",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Store(_) => "store",
        }
    }
}

impl From<central_auth::Error> for Error {
    fn from(e: central_auth::Error) -> Self {
        match e {
            central_auth::Error::Transport(e) => Error::Transport(e),
            central_auth::Error::Rejected { status, body, .. } if status >= 500 => {
                Error::Status { status, body }
            }
            central_auth::Error::Rejected {
                credential_id,
                status,
                body,
            } => Error::AuthenticationFailed {
                credential_id,
                status,
                message: body,
            },
            central_auth::Error::InvalidResponse(m) => Error::InvalidResponse(m),
            central_auth::Error::Store(m) => Error::Store(m),
        }
    }
}

impl From<central_pool::Error> for Error {
    fn from(e: central_pool::Error) -> Self {
        match e {
            central_pool::Error::NoCredentialAvailable { waited } => {
                Error::NoCredentialAvailable { waited }
            }
            central_pool::Error::UnknownCredential(id) => {
                Error::Store(format!("no session slot for credential {id}"))
            }
            central_pool::Error::Transport(e) => Error::Transport(e),
        }
    }
}

/// Result alias for Central operations.
pub type Result<T> = std::result::Result<T, Error>;
