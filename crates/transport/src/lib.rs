//! Transport abstraction for calls to the Central server
//!
//! Defines the `Transport` trait that decouples the request executor and the
//! authenticator from the HTTP client. `HttpConnector` builds reqwest-backed
//! transports; tests substitute scripted transports to simulate connection
//! failures and status sequences.
//!
//! A `Connector` produces a fresh transport whenever a session is reset, so a
//! session's connection pool is replaced together with its token.

pub mod http;

pub use http::{HttpConnector, HttpTransport};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
pub use reqwest::{Method, Url};
pub use reqwest::header;
pub use reqwest::header::HeaderMap;

/// Boxed future used by the dyn-compatible traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One physical HTTP request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A fully read HTTP response. Any status is a response, not an error.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundResponse {
    /// Response body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// DNS failure, refused or reset connection
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    /// Connection dropped while sending or reading the body
    #[error("I/O failure: {0}")]
    Io(String),

    /// The transport could not be constructed or the request was malformed
    #[error("transport setup failed: {0}")]
    Build(String),
}

impl TransportError {
    /// Whether another attempt on a fresh request may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Build(_))
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Sends one request and reads the full response.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<InboundResponse>>;
}

/// Builds transports. Called once per session reset.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Transport>>;
}
