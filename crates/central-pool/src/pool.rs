//! Credential pool with exclusive, return-on-drop leases
//!
//! The pool is a bounded queue seeded with every configured credential once,
//! paired with a FIFO semaphore holding one permit per queued credential. A
//! caller first waits for a permit (bounded by the acquire timeout), then pops
//! a credential. Releasing pushes the credential back before the permit is
//! returned, so a permit holder always finds a credential in the queue.
//!
//! The pool is constructed once by the application and shared by cloning;
//! there is no hidden global instance.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use central_auth::Credential;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

struct Inner {
    queue: Mutex<VecDeque<Credential>>,
    permits: Arc<Semaphore>,
    credential_ids: Vec<u32>,
    lease_warn_after: Duration,
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Credential>> {
        // A poisoned queue still holds valid credentials
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide pool of Central service accounts.
#[derive(Clone)]
pub struct CredentialPool {
    inner: Arc<Inner>,
}

impl CredentialPool {
    /// Create a pool holding each credential exactly once.
    ///
    /// Duplicate ids are dropped with a warning. Leases held longer than
    /// `lease_warn_after` are logged when released.
    pub fn new(credentials: Vec<Credential>, lease_warn_after: Duration) -> Self {
        let mut queue = VecDeque::with_capacity(credentials.len());
        let mut credential_ids = Vec::with_capacity(credentials.len());
        for credential in credentials {
            if credential_ids.contains(&credential.id) {
                warn!(
                    credential_id = credential.id,
                    "duplicate credential id ignored"
                );
                continue;
            }
            credential_ids.push(credential.id);
            queue.push_back(credential);
        }

        info!(credentials = queue.len(), "credential pool initialized");
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(queue.len())),
                queue: Mutex::new(queue),
                credential_ids,
                lease_warn_after,
            }),
        }
    }

    /// Wait up to `timeout` for a free credential.
    ///
    /// Waiters are served in arrival order. Fails with
    /// `NoCredentialAvailable` once `timeout` has fully elapsed.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease> {
        let started = Instant::now();
        let permit = match tokio::time::timeout(
            timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                metrics::counter!("central_pool_exhausted_total").increment(1);
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    credentials = self.inner.credential_ids.len(),
                    "no Central credential available"
                );
                return Err(Error::NoCredentialAvailable {
                    waited: started.elapsed(),
                });
            }
        };

        let Some(credential) = self.inner.queue().pop_front() else {
            // Permit count and queue length move together; reaching this
            // means a credential was lost.
            error!("credential pool permit granted with empty queue");
            return Err(Error::NoCredentialAvailable {
                waited: started.elapsed(),
            });
        };

        let waited = started.elapsed();
        metrics::histogram!("central_pool_wait_seconds").record(waited.as_secs_f64());
        debug!(
            credential_id = credential.id,
            waited_ms = waited.as_millis() as u64,
            "credential leased"
        );

        Ok(Lease {
            credential,
            permit: Some(permit),
            pool: self.inner.clone(),
            acquired_at: Instant::now(),
        })
    }

    /// Total configured credentials.
    pub fn total(&self) -> usize {
        self.inner.credential_ids.len()
    }

    /// Credentials not currently leased.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn credential_ids(&self) -> &[u32] {
        &self.inner.credential_ids
    }

    /// Pool summary for the health endpoint.
    pub fn status(&self) -> serde_json::Value {
        let total = self.total();
        let available = self.available();
        let status = if total == 0 {
            "unhealthy"
        } else if available == 0 {
            "saturated"
        } else {
            "healthy"
        };
        serde_json::json!({
            "status": status,
            "credentials_total": total,
            "credentials_available": available,
            "credentials_leased": total.saturating_sub(available),
        })
    }
}

/// Exclusive use of one credential. Returned to the pool on drop.
pub struct Lease {
    credential: Credential,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Inner>,
    acquired_at: Instant,
}

impl Lease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn credential_id(&self) -> u32 {
        self.credential().id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Return the credential now. Equivalent to dropping the lease.
    pub fn release(self) {}
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("credential_id", &self.credential_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let credential = self.credential.clone();
        let held = self.acquired_at.elapsed();
        if held > self.pool.lease_warn_after {
            warn!(
                credential_id = credential.id,
                held_ms = held.as_millis() as u64,
                "credential lease held longer than expected"
            );
        }
        debug!(credential_id = credential.id, "credential returned to pool");
        self.pool.queue().push_back(credential);
        // Permit goes back only after the credential is queued
        drop(self.permit.take());
    }
}
