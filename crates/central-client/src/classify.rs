//! Outcome classification for Central responses
//!
//! Maps a status code or transport failure onto what the executor does next:
//! return, retry with backoff, re-authenticate, or fail immediately.

use transport::TransportError;

/// What a response status means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Token was rejected; clear it and try again
    Unauthorized,
    NotFound,
    Forbidden,
    /// 5xx and above; retried with backoff
    ServerError,
    /// Any other status; fatal
    Other,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        403 => StatusClass::Forbidden,
        404 => StatusClass::NotFound,
        500.. => StatusClass::ServerError,
        _ => StatusClass::Other,
    }
}

/// Why an attempt is being retried. Used as the `reason` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Connect,
    Timeout,
    ServerError,
    Unauthorized,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryReason::Connect => "connect",
            RetryReason::Timeout => "timeout",
            RetryReason::ServerError => "server_error",
            RetryReason::Unauthorized => "unauthorized",
        }
    }

    /// 401 retries go straight back to authentication without sleeping.
    pub fn backs_off(self) -> bool {
        !matches!(self, RetryReason::Unauthorized)
    }
}

/// Retry reason for a transport failure, or `None` if it is fatal.
pub fn classify_transport(error: &TransportError) -> Option<RetryReason> {
    match error {
        TransportError::Timeout => Some(RetryReason::Timeout),
        TransportError::Connect(_) | TransportError::Io(_) => Some(RetryReason::Connect),
        TransportError::Build(_) => None,
    }
}
