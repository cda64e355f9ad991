//! Token lifecycle for one credential's session
//!
//! `ensure_token` is called before every attempt. The fast path returns the
//! cached token without touching the network. Otherwise one `/sessions`
//! exchange runs, the token is stored in the session with an expiry shortened
//! by the safety margin, and the result is upserted into the session tracker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_SAFETY_MARGIN, DEFAULT_TOKEN_LIFETIME};
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::session::{BearerToken, Session};
use crate::token::create_session;
use crate::tracker::{SessionRecord, SessionTracker};

/// How long obtained tokens are used locally.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Lifetime assumed when the server does not state an expiry
    pub lifetime: Duration,
    /// Subtracted from the server expiry to avoid mid-request expiration
    pub safety_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_TOKEN_LIFETIME,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl TokenPolicy {
    /// Local expiry for a token issued at `now`.
    ///
    /// The margin never eats more than half the remaining lifetime, so a
    /// short-lived token is still usable instead of expiring on arrival.
    pub fn local_expiry(
        &self,
        now: DateTime<Utc>,
        server_expiry: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let nominal = server_expiry.unwrap_or_else(|| now + to_chrono(self.lifetime));
        let remaining = nominal - now;
        if remaining <= chrono::Duration::zero() {
            return now;
        }
        let margin = to_chrono(self.safety_margin).min(remaining / 2);
        nominal - margin
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Obtains and caches bearer tokens for credentials.
pub struct Authenticator {
    base_url: String,
    policy: TokenPolicy,
    tracker: Arc<dyn SessionTracker>,
}

impl Authenticator {
    pub fn new(
        base_url: impl Into<String>,
        policy: TokenPolicy,
        tracker: Arc<dyn SessionTracker>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            policy,
            tracker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Return a valid token for `credential`, authenticating if needed.
    ///
    /// On rejection the session keeps no token, so the next lease holder
    /// authenticates from scratch rather than inheriting poisoned state.
    pub async fn ensure_token(
        &self,
        credential: &Credential,
        session: &mut Session,
        local_user: &str,
    ) -> Result<BearerToken> {
        let now = Utc::now();
        if let Some(token) = session.valid_token(now) {
            return Ok(token.clone());
        }

        let transport = session.transport().ok_or_else(|| {
            Error::Transport(transport::TransportError::Build(format!(
                "session for credential {} has no transport",
                credential.id
            )))
        })?;

        debug!(credential_id = credential.id, "authenticating with Central");
        let response = match create_session(transport.as_ref(), &self.base_url, credential).await
        {
            Ok(response) => response,
            Err(e) => {
                session.clear_token();
                metrics::counter!("central_auth_total", "result" => "failure").increment(1);
                warn!(
                    credential_id = credential.id,
                    local_user,
                    error = %e,
                    "Central authentication failed"
                );
                return Err(e);
            }
        };

        let issued_at = Utc::now();
        let token = BearerToken::new(
            response.token,
            self.policy.local_expiry(issued_at, response.expires_at),
        );
        session.store_token(token.clone());
        metrics::counter!("central_auth_total", "result" => "success").increment(1);

        let record = SessionRecord {
            credential_id: credential.id,
            token: token.value.expose().clone(),
            token_expires_at: token.expires_at,
            updated_at: issued_at,
        };
        if let Err(e) = self.tracker.upsert(local_user, record).await {
            warn!(local_user, error = %e, "failed to record session for local user");
        }

        info!(
            credential_id = credential.id,
            local_user,
            expires_at = %token.expires_at,
            "Central authentication succeeded"
        );
        Ok(token)
    }
}
