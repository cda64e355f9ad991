//! Central Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads the service-account pool, access grants and local projects
//! 2. Listens for requests from the authenticating front end
//! 3. Runs each request as one audited business operation against Central
//! 4. Exposes pool health and Prometheus metrics

mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use central_auth::{Authenticator, DiscardTracker, SessionFile, SessionTracker};
use central_client::{
    AuditRecorder, AuditSink, Executor, Gateway, JsonLinesAuditLog, MemoryProjectStore,
    TracingAuditSink,
};
use central_pool::{CredentialPool, SessionCache};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpConnector;

use crate::config::Config;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP connect timeout for Central connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest accepted form upload body.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    gateway: Arc<Gateway>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently served requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", api::router())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(axum::middleware::from_fn(track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the gateway from configuration.
async fn build_gateway(config: &Config) -> Result<Gateway> {
    let tracker: Arc<dyn SessionTracker> = match &config.storage.session_file {
        Some(path) => Arc::new(
            SessionFile::load(path.clone())
                .await
                .with_context(|| format!("failed to open session file {}", path.display()))?,
        ),
        None => Arc::new(DiscardTracker),
    };
    let authenticator = Authenticator::new(
        config.central.base_url.as_str(),
        config.token_policy(),
        tracker,
    );
    let executor =
        Executor::new(authenticator, config.retry_policy()).context("invalid central.base_url")?;

    let pool = CredentialPool::new(config.credentials()?, config.lease_warn_after());
    let connector = HttpConnector::new(config.central.verify_tls, CONNECT_TIMEOUT);
    let sessions = SessionCache::new(pool.credential_ids(), Arc::new(connector));

    let sink: Arc<dyn AuditSink> = match &config.storage.audit_log {
        Some(path) => Arc::new(
            JsonLinesAuditLog::open(path)
                .await
                .with_context(|| format!("failed to open audit log {}", path.display()))?,
        ),
        None => {
            info!("no audit_log configured, audit records go to the log stream");
            Arc::new(TracingAuditSink)
        }
    };

    Ok(Gateway::new(
        pool,
        sessions,
        executor,
        AuditRecorder::new(sink),
        Arc::new(config.access_policy()),
        Arc::new(MemoryProjectStore::new(config.projects.clone())),
        config.acquire_timeout(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting central-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.central.base_url,
        credentials = config.central.credentials.len(),
        actors = config.access.len(),
        local_projects = config.projects.len(),
        "configuration loaded"
    );
    if !config.central.verify_tls {
        warn!("central.verify_tls is false; Central certificates will not be checked");
    }

    let gateway = Arc::new(build_gateway(&config).await?);

    let app_state = AppState {
        gateway: gateway.clone(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    gateway.close().await;

    info!("shutdown complete");
    Ok(())
}

/// Credential pool health. 503 when no credential is configured.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (available, total) = state.gateway.pool_occupancy();
    metrics::set_pool_occupancy(available, total);

    let mut body = state.gateway.pool_status();
    body["uptime_seconds"] = state.started_at.elapsed().as_secs().into();

    let status_code = if total == 0 {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Count and time every inbound request.
async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{delete, post};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// What the fake Central saw, one `METHOD path?query` line per request.
    #[derive(Clone, Default)]
    struct CentralLog(Arc<Mutex<Vec<String>>>);

    impl CentralLog {
        fn push(&self, line: String) {
            self.0.lock().unwrap().push(line);
        }

        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Start a fake Central API on an ephemeral port. Returns its `/v1` base URL.
    async fn start_fake_central() -> (String, CentralLog, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = CentralLog::default();

        let app = axum::Router::new()
            .route(
                "/v1/sessions",
                post(|| async { axum::Json(json!({ "token": "tok_live" })) }),
            )
            .route(
                "/v1/projects",
                get(|| async {
                    axum::Json(json!([
                        { "id": 3, "name": "Household survey" },
                        { "id": 4, "name": "Water points" },
                    ]))
                })
                .post(|| async { axum::Json(json!({ "id": 42, "name": "Created" })) }),
            )
            .route(
                "/v1/projects/{id}",
                delete(|| async { axum::Json(json!({ "success": true })) }),
            )
            .route(
                "/v1/projects/{id}/forms",
                post(|| async {
                    (
                        StatusCode::CONFLICT,
                        axum::Json(json!({ "message": "form already exists" })),
                    )
                }),
            )
            .route(
                "/v1/projects/{id}/forms/{form}/draft/publish",
                post(|| async { axum::Json(json!({ "success": true })) }),
            )
            .route(
                "/v1/sessions/{token}",
                delete(|| async { axum::Json(json!({ "success": true })) }),
            )
            .route(
                "/v1/projects/{id}/forms/{form}/submissions.csv",
                get(|| async { "instanceID,name\nuuid:1,Ada\n" }),
            )
            .layer(axum::middleware::from_fn({
                let log = log.clone();
                move |request: Request<Body>, next: Next| {
                    let log = log.clone();
                    async move {
                        let auth = request
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-")
                            .to_string();
                        log.push(format!("{} {} {auth}", request.method(), request.uri()));
                        next.run(request).await
                    }
                }
            }));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1"), log, handle)
    }

    /// Config against `base_url` with one credential and two actors.
    fn test_config(dir: &tempfile::TempDir, base_url: &str) -> Config {
        let password = dir.path().join("password");
        std::fs::write(&password, "pw").unwrap();
        let path = dir.path().join("central-gateway.toml");
        std::fs::write(
            &path,
            format!(
                r#"
[central]
base_url = "{base_url}"
max_attempts = 2
backoff_base_ms = 10
acquire_timeout_secs = 1

[[central.credentials]]
id = 6
email = "svc@example.org"
password_file = "{password}"

[server]
listen_addr = "127.0.0.1:0"

[storage]
audit_log = "{audit}"

[[access]]
actor = "alice"
role = "administrator"

[[access]]
actor = "bob"
role = "data_collector"
projects = [3]

[[projects]]
id = 1
name = "Household survey"
"#,
                password = password.display(),
                audit = dir.path().join("audit.jsonl").display(),
            ),
        )
        .unwrap();
        Config::load(&path).unwrap()
    }

    async fn test_app(config: &Config) -> (Router, Arc<Gateway>) {
        let gateway = Arc::new(build_gateway(config).await.unwrap());
        let state = AppState {
            gateway: gateway.clone(),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        };
        (build_router(state, 100), gateway)
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn audit_lines(dir: &tempfile::TempDir) -> Vec<Value> {
        std::fs::read_to_string(dir.path().join("audit.jsonl"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_endpoint_reports_pool() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, "http://127.0.0.1:9/v1");
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["credentials_total"], 1);
        assert_eq!(json["credentials_available"], 1);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, "http://127.0.0.1:9/v1");
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"), "got {content_type}");
    }

    #[tokio::test]
    async fn missing_actor_is_rejected_before_any_central_call() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/projects")
                    .header(api::REQUEST_ID_HEADER, "req_missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "missing_actor");
        assert_eq!(json["error"]["request_id"], "req_missing");
        assert!(log.lines().is_empty());
    }

    #[tokio::test]
    async fn project_list_is_filtered_and_audited() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/projects")
                    .header(api::ACTOR_HEADER, "bob")
                    .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let projects = json.as_array().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["id"], 3);

        let lines = log.lines();
        assert_eq!(lines, vec!["POST /v1/sessions -", "GET /v1/projects Bearer tok_live"]);

        let audit = audit_lines(&dir);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["actor_id"], "bob");
        assert_eq!(audit[0]["action"], "list_accessible_projects");
        assert_eq!(audit[0]["source_ip"], "203.0.113.9");
        assert_eq!(audit[0]["success"], true);
        assert_eq!(audit[0]["details"]["central_account"], 6);
    }

    #[tokio::test]
    async fn permission_denied_maps_to_403() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/projects/4")
                    .header(api::ACTOR_HEADER, "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "permission_denied");
        assert!(log.lines().is_empty());
        assert_eq!(audit_lines(&dir)[0]["success"], false);
    }

    #[tokio::test]
    async fn csv_export_streams_raw_bytes() {
        let (base_url, _log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/projects/3/forms/household/submissions.csv")
                    .header(api::ACTOR_HEADER, "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/csv")
        );
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"instanceID,name\nuuid:1,Ada\n");
    }

    #[tokio::test]
    async fn failed_upload_rolls_back_provisioned_project() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/local-projects/1/forms?file_name=household.xml&publish=true")
                    .header(api::ACTOR_HEADER, "alice")
                    .body(Body::from("<h:html/>"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "upstream_status");

        let lines = log.lines();
        assert_eq!(lines[1], "POST /v1/projects Bearer tok_live");
        assert!(
            lines[2].starts_with("POST /v1/projects/42/forms?ignoreWarnings=false&publish=true"),
            "got {lines:?}"
        );
        assert_eq!(lines[3], "DELETE /v1/projects/42 Bearer tok_live");

        let audit = audit_lines(&dir);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["action"], "upload_form");
        assert_eq!(audit[0]["details"]["rolled_back"], true);
    }

    #[tokio::test]
    async fn draft_publish_forwards_version() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/projects/3/forms/household/draft/publish?version=2024.2")
                    .header(api::ACTOR_HEADER, "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            log.lines()[1],
            "POST /v1/projects/3/forms/household/draft/publish?version=2024.2 Bearer tok_live"
        );
        let audit = audit_lines(&dir);
        assert_eq!(audit[0]["action"], "publish_form_draft");
        assert_eq!(audit[0]["details"]["version"], "2024.2");
    }

    #[tokio::test]
    async fn app_user_token_revocation_checks_token_shape() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, _) = test_app(&config).await;
        let token = "a".repeat(64);

        let revoke = |token: &str| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/projects/3/app-user-tokens/{token}"))
                .header(api::ACTOR_HEADER, "bob")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(revoke("too-short")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(log.lines().is_empty());

        let response = app.oneshot(revoke(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            log.lines()[1],
            format!("DELETE /v1/sessions/{token} Bearer tok_live")
        );

        let audit = audit_lines(&dir);
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1]["action"], "revoke_app_user");
        assert_eq!(audit[1]["details"]["token"], "aaaaaaaaaa...");
    }

    #[tokio::test]
    async fn unreachable_central_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        // Bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let config = test_config(&dir, &format!("http://{addr}/v1"));
        let (app, _) = test_app(&config).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/projects")
                    .header(api::ACTOR_HEADER, "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "retries_exhausted");
    }

    #[tokio::test]
    async fn close_clears_session_tokens() {
        let (base_url, log, _server) = start_fake_central().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &base_url);
        let (app, gateway) = test_app(&config).await;

        let request = || {
            Request::builder()
                .uri("/v1/projects")
                .header(api::ACTOR_HEADER, "alice")
                .body(Body::empty())
                .unwrap()
        };
        app.clone().oneshot(request()).await.unwrap();
        gateway.close().await;
        app.oneshot(request()).await.unwrap();

        let sessions = log
            .lines()
            .iter()
            .filter(|l| l.starts_with("POST /v1/sessions"))
            .count();
        assert_eq!(sessions, 2, "closed sessions must authenticate again");
    }
}
