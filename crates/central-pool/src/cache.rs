//! Per-credential session cache
//!
//! One `Session` slot per configured credential, each behind its own async
//! mutex. The slot map is fixed at construction, so looking up a slot takes no
//! lock at all and two credentials never contend.
//!
//! Staleness is detected lazily on checkout: a slot that was never opened or
//! whose token expired gets a fresh transport and no token. Tokens cleared by
//! a 401 keep the transport.

use std::collections::HashMap;
use std::sync::Arc;

use central_auth::{Credential, Session};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use transport::Connector;

use crate::error::{Error, Result};

/// Exclusive access to one credential's session.
pub type SessionGuard = OwnedMutexGuard<Session>;

pub struct SessionCache {
    slots: HashMap<u32, Arc<Mutex<Session>>>,
    connector: Arc<dyn Connector>,
}

impl SessionCache {
    pub fn new(credential_ids: &[u32], connector: Arc<dyn Connector>) -> Self {
        let slots = credential_ids
            .iter()
            .map(|id| (*id, Arc::new(Mutex::new(Session::vacant(*id)))))
            .collect();
        Self { slots, connector }
    }

    /// Lock and return the session for `credential`, resetting it if stale.
    ///
    /// Callers must hold the credential's lease. Updates made through the
    /// guard are seen by every later lease of the same credential.
    pub async fn checkout(&self, credential: &Credential) -> Result<SessionGuard> {
        let slot = self
            .slots
            .get(&credential.id)
            .ok_or(Error::UnknownCredential(credential.id))?
            .clone();

        let mut session = slot.lock_owned().await;
        if session.needs_reset(Utc::now()) {
            debug!(credential_id = credential.id, "resetting session");
            session.reset(self.connector.connect()?);
        }
        Ok(session)
    }

    /// Drop every transport and token.
    pub async fn close_all(&self) {
        for (id, slot) in &self.slots {
            slot.lock().await.close();
            debug!(credential_id = id, "session closed");
        }
    }

    /// Whether a credential's session currently holds a token.
    pub async fn has_token(&self, credential_id: u32) -> bool {
        match self.slots.get(&credential_id) {
            Some(slot) => slot.lock().await.has_token(),
            None => false,
        }
    }
}
