//! Resilient request executor
//!
//! One logical call runs as a bounded sequence of attempts. Each attempt
//! makes sure the session holds a valid token, sends the request with a
//! per-attempt timeout and classifies the outcome:
//!
//! - 2xx returns (204 or an empty body becomes a success marker)
//! - connection failures, timeouts and 5xx sleep with capped exponential
//!   backoff and retry
//! - 401 clears the cached token and retries at once, re-authenticating
//! - 404 and 403 fail immediately, as does any other status
//!
//! When the budget runs out the last transient cause is reported inside
//! `RetriesExhausted`. An optional deadline stops the loop early instead of
//! sleeping past it.

use std::time::Duration;

use bytes::Bytes;
use central_auth::{Authenticator, Credential, Session};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transport::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use transport::{HeaderMap, InboundResponse, Method, OutboundRequest, Url};

use crate::classify::{RetryReason, StatusClass, classify_status, classify_transport};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::retry::{RetryContext, RetryPolicy};

/// Per-call options beyond method and path.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Stop retrying once this instant would be passed
    pub deadline: Option<Instant>,
}

impl RequestOptions {
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(self, payload: &Value) -> Self {
        let body = Bytes::from(payload.to_string());
        self.raw(body, HeaderValue::from_static("application/json"))
    }

    /// Raw request body with an explicit content type (form uploads).
    pub fn raw(mut self, body: Bytes, content_type: HeaderValue) -> Self {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = body;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of one failed attempt.
enum Failure {
    Fatal(Error),
    Retry { reason: RetryReason, cause: Error },
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Fatal(e)
    }
}

/// Issues authenticated calls against the Central API.
pub struct Executor {
    base_url: Url,
    authenticator: Authenticator,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(authenticator: Authenticator, policy: RetryPolicy) -> Result<Self> {
        let base_url = Url::parse(authenticator.base_url())
            .map_err(|e| Error::InvalidRequest(format!("invalid Central base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidRequest(format!(
                "Central base URL cannot carry paths: {base_url}"
            )));
        }
        Ok(Self {
            base_url,
            authenticator,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Web form URL that submits through a public access link. Enketo is
    /// served next to the API root, not under it.
    pub fn public_link_url(&self, enketo_id: &str, token: &str) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .pop()
                .extend(["-", "single", enketo_id]);
        }
        url.query_pairs_mut().clear().append_pair("st", token);
        url.to_string()
    }

    /// Perform one logical call and parse the JSON body.
    pub async fn execute(
        &self,
        credential: &Credential,
        session: &mut Session,
        ctx: &RequestContext,
        method: Method,
        path: &[&str],
        options: RequestOptions,
    ) -> Result<Value> {
        let response = self
            .execute_raw(credential, session, ctx, method, path, options)
            .await?;
        parse_body(&response)
    }

    /// Perform one logical call and return the successful response as is.
    pub async fn execute_raw(
        &self,
        credential: &Credential,
        session: &mut Session,
        ctx: &RequestContext,
        method: Method,
        path: &[&str],
        options: RequestOptions,
    ) -> Result<InboundResponse> {
        let started = Instant::now();
        let result = self
            .run(credential, session, ctx, method, path, &options)
            .await;

        metrics::histogram!("central_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!("central_requests_total", "outcome" => outcome).increment(1);
        result
    }

    async fn run(
        &self,
        credential: &Credential,
        session: &mut Session,
        ctx: &RequestContext,
        method: Method,
        path: &[&str],
        options: &RequestOptions,
    ) -> Result<InboundResponse> {
        let url = self.endpoint(path, &options.query);
        let mut retry = RetryContext::new(self.policy.max_attempts);

        loop {
            let attempt = retry.begin_attempt();
            if options.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::DeadlineExceeded {
                    attempts: attempt - 1,
                });
            }

            let (reason, cause) = match self
                .attempt(credential, session, ctx, &method, &url, options)
                .await
            {
                Ok(response) => {
                    debug!(
                        correlation_id = %ctx.correlation_id,
                        credential_id = credential.id,
                        %method,
                        url = %url,
                        status = response.status,
                        attempt,
                        "Central call succeeded"
                    );
                    return Ok(response);
                }
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Retry { reason, cause }) => (reason, cause),
            };

            metrics::counter!("central_retries_total", "reason" => reason.as_str()).increment(1);
            warn!(
                correlation_id = %ctx.correlation_id,
                credential_id = credential.id,
                %method,
                url = %url,
                attempt,
                max_attempts = retry.max_attempts,
                reason = reason.as_str(),
                error = %cause,
                "Central call attempt failed"
            );
            retry.last_error = Some(cause);

            if retry.exhausted() {
                return Err(retry.into_exhausted());
            }

            if reason.backs_off() {
                let delay = self.policy.delay(attempt);
                if options
                    .deadline
                    .is_some_and(|d| Instant::now() + delay >= d)
                {
                    return Err(Error::DeadlineExceeded { attempts: attempt });
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(
        &self,
        credential: &Credential,
        session: &mut Session,
        ctx: &RequestContext,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> std::result::Result<InboundResponse, Failure> {
        let token = match self
            .authenticator
            .ensure_token(credential, session, &ctx.actor_id)
            .await
        {
            Ok(token) => token,
            Err(e) if e.is_transient() => {
                let reason = match &e {
                    central_auth::Error::Transport(t) => {
                        classify_transport(t).unwrap_or(RetryReason::Connect)
                    }
                    _ => RetryReason::ServerError,
                };
                return Err(Failure::Retry {
                    reason,
                    cause: e.into(),
                });
            }
            Err(e) => {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    credential_id = credential.id,
                    error = %e,
                    "Central authentication failed"
                );
                return Err(Failure::Fatal(e.into()));
            }
        };

        let transport = session.transport().ok_or_else(|| {
            Error::Transport(transport::TransportError::Build(format!(
                "session for credential {} has no transport",
                credential.id
            )))
        })?;

        let mut request = OutboundRequest::new(method.clone(), url);
        request.headers = options.headers.clone();
        let bearer = HeaderValue::from_str(&token.header_value())
            .map_err(|e| Error::InvalidResponse(format!("token is not a valid header: {e}")))?;
        request.headers.insert(AUTHORIZATION, bearer);
        request.body = options.body.clone();

        let timeout = self.attempt_timeout(options.deadline);
        let response = match tokio::time::timeout(timeout, transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(match classify_transport(&e) {
                    Some(reason) => Failure::Retry {
                        reason,
                        cause: e.into(),
                    },
                    None => Failure::Fatal(e.into()),
                });
            }
            Err(_) => {
                return Err(Failure::Retry {
                    reason: RetryReason::Timeout,
                    cause: transport::TransportError::Timeout.into(),
                });
            }
        };

        let status = response.status;
        match classify_status(status) {
            StatusClass::Success => Ok(response),
            StatusClass::Unauthorized => {
                session.clear_token();
                info!(
                    correlation_id = %ctx.correlation_id,
                    credential_id = credential.id,
                    "token rejected, re-authenticating"
                );
                Err(Failure::Retry {
                    reason: RetryReason::Unauthorized,
                    cause: Error::Status {
                        status,
                        body: response.body_text(),
                    },
                })
            }
            StatusClass::NotFound => Err(Error::NotFound(url.to_string()).into()),
            StatusClass::Forbidden => Err(Error::Forbidden(response.body_text()).into()),
            StatusClass::ServerError => Err(Failure::Retry {
                reason: RetryReason::ServerError,
                cause: Error::Status {
                    status,
                    body: response.body_text(),
                },
            }),
            StatusClass::Other => Err(Error::Status {
                status,
                body: response.body_text(),
            }
            .into()),
        }
    }

    fn attempt_timeout(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(d) => self
                .policy
                .attempt_timeout
                .min(d.saturating_duration_since(Instant::now())),
            None => self.policy.attempt_timeout,
        }
    }

    /// Base URL plus percent-encoded path segments and query pairs.
    fn endpoint(&self, path: &[&str], query: &[(String, String)]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url.to_string()
    }
}

/// Decode a successful response. No content becomes
/// `{"success": true, "status_code": <status>}`.
fn parse_body(response: &InboundResponse) -> Result<Value> {
    if response.status == 204 || response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::json!({
            "success": true,
            "status_code": response.status,
        }));
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::InvalidResponse(format!("malformed JSON body: {e}")))
}
