//! Scripted Central server for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use central_auth::{Authenticator, Credential, DiscardTracker, TokenPolicy};
use central_pool::{CredentialPool, SessionCache};
use tokio::time::Instant;
use transport::{
    BoxFuture, Connector, HeaderMap, InboundResponse, OutboundRequest, Transport, TransportError,
};

use crate::audit::{AuditRecorder, AuditSink};
use crate::executor::Executor;
use crate::gateway::Gateway;
use crate::policy::{AccessPolicy, Role, RolePolicy};
use crate::projects::ProjectStore;
use crate::retry::RetryPolicy;

/// Next outcome for a non-session request.
#[derive(Debug, Clone)]
pub enum Step {
    Refuse,
    /// Never answers; exercises the attempt timeout
    Hang,
    Respond(u16, &'static str),
}

/// A request the scripted server saw, minus `/sessions` calls.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: transport::Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub at: Instant,
}

/// Answers `/sessions` with `tok_<n>` and everything else from a script.
/// An exhausted script answers 200 `{}`. Scripted `/sessions` steps, if
/// any, are used before falling back to `auth_status`.
pub struct ScriptedCentral {
    steps: Mutex<VecDeque<Step>>,
    auth_steps: Mutex<VecDeque<Step>>,
    auth_status: u16,
    auth_calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedCentral {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Self::with_auth_status(200, steps)
    }

    pub fn with_auth_status(auth_status: u16, steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            auth_steps: Mutex::new(VecDeque::new()),
            auth_status,
            auth_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// `/sessions` answers in order; `Respond(200, _)` bodies are sent as-is.
    pub fn with_auth_steps(
        auth_steps: impl IntoIterator<Item = Step>,
        steps: impl IntoIterator<Item = Step>,
    ) -> Arc<Self> {
        let central = Self::new(steps);
        central.auth_steps.lock().unwrap().extend(auth_steps);
        central
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn respond(status: u16, body: impl Into<Bytes>) -> transport::Result<InboundResponse> {
    Ok(InboundResponse {
        status,
        headers: HeaderMap::new(),
        body: body.into(),
    })
}

impl Transport for ScriptedCentral {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, transport::Result<InboundResponse>> {
        if request.url.ends_with("/sessions") {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(step) = self.auth_steps.lock().unwrap().pop_front() {
                return Box::pin(run(step));
            }
            let status = self.auth_status;
            return Box::pin(async move {
                if status == 200 {
                    respond(200, format!(r#"{{"token":"tok_{n}"}}"#))
                } else {
                    respond(status, r#"{"message":"Could not authenticate"}"#)
                }
            });
        }

        self.seen.lock().unwrap().push(Seen {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Respond(200, "{}"));
        Box::pin(run(step))
    }
}

async fn run(step: Step) -> transport::Result<InboundResponse> {
    match step {
        Step::Refuse => Err(TransportError::Connect("connection refused".into())),
        Step::Hang => std::future::pending().await,
        Step::Respond(status, body) => respond(status, body),
    }
}

/// Hands out the same scripted server for every session.
pub struct ScriptedConnector(pub Arc<ScriptedCentral>);

impl Connector for ScriptedConnector {
    fn connect(&self) -> transport::Result<Arc<dyn Transport>> {
        Ok(self.0.clone())
    }
}

/// Gateway over a scripted server with `credentials` service accounts.
///
/// Actors: `admin` (administrator), `field` (data collector on project 7),
/// `guest` (viewer on project 7).
pub fn gateway(
    central: &Arc<ScriptedCentral>,
    audit: Arc<dyn AuditSink>,
    projects: Arc<dyn ProjectStore>,
    credentials: u32,
) -> Gateway {
    let policy = RolePolicy::new()
        .grant("admin", Role::Administrator, [])
        .grant("field", Role::DataCollector, [7])
        .grant("guest", Role::Viewer, [7]);
    gateway_with_policy(central, audit, projects, credentials, Arc::new(policy))
}

/// Same as [`gateway`] with a caller-supplied access policy.
pub fn gateway_with_policy(
    central: &Arc<ScriptedCentral>,
    audit: Arc<dyn AuditSink>,
    projects: Arc<dyn ProjectStore>,
    credentials: u32,
    policy: Arc<dyn AccessPolicy>,
) -> Gateway {
    let credentials: Vec<Credential> = (1..=credentials)
        .map(|id| Credential::new(id, format!("svc{id}@example.org"), "pw"))
        .collect();
    let pool = CredentialPool::new(credentials, Duration::from_secs(60));
    let sessions = SessionCache::new(
        pool.credential_ids(),
        Arc::new(ScriptedConnector(central.clone())),
    );
    let authenticator = Authenticator::new(
        "https://central.test/v1",
        TokenPolicy::default(),
        Arc::new(DiscardTracker),
    );
    let executor = Executor::new(
        authenticator,
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(100),
        },
    )
    .unwrap();

    Gateway::new(
        pool,
        sessions,
        executor,
        AuditRecorder::new(audit),
        policy,
        projects,
        Duration::from_millis(200),
    )
}
