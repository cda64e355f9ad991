//! Per-credential session state
//!
//! A `Session` exists once per credential and survives across many leases.
//! It is mutated only by the current lease holder, under the per-credential
//! lock held by the session cache.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Secret;
use transport::Transport;

/// A bearer token together with the instant it stops being used locally.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub value: Secret<String>,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: Secret::new(value.into()),
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.value.expose())
    }
}

/// Cached transport and token for one credential.
pub struct Session {
    credential_id: u32,
    transport: Option<Arc<dyn Transport>>,
    token: Option<BearerToken>,
}

impl Session {
    /// A session slot with no transport yet. The first checkout resets it.
    pub fn vacant(credential_id: u32) -> Self {
        Self {
            credential_id,
            transport: None,
            token: None,
        }
    }

    pub fn credential_id(&self) -> u32 {
        self.credential_id
    }

    /// True when the slot was never opened or its token has expired.
    pub fn needs_reset(&self, now: DateTime<Utc>) -> bool {
        self.transport.is_none() || self.token.as_ref().is_some_and(|t| !t.is_valid_at(now))
    }

    /// Replace the transport and drop any token.
    pub fn reset(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
        self.token = None;
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    /// The cached token, if it is still valid at `now`.
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&BearerToken> {
        self.token.as_ref().filter(|t| t.is_valid_at(now))
    }

    pub fn store_token(&mut self, token: BearerToken) {
        self.token = Some(token);
    }

    /// Forget the token so the next call re-authenticates (401 handling).
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Drop the transport and token (shutdown).
    pub fn close(&mut self) {
        self.transport = None;
        self.token = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credential_id", &self.credential_id)
            .field("connected", &self.transport.is_some())
            .field("token", &self.token)
            .finish()
    }
}
