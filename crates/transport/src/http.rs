//! reqwest-backed transport
//!
//! Each session owns one `HttpTransport`, which wraps a `reqwest::Client` and
//! therefore its keep-alive connection pool. TLS verification is on unless the
//! connector is explicitly built with `verify_tls = false`.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::{
    BoxFuture, Connector, InboundResponse, OutboundRequest, Result, Transport, TransportError,
};

/// Builds a new reqwest client per session reset.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    verify_tls: bool,
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(verify_tls: bool, connect_timeout: Duration) -> Self {
        if !verify_tls {
            warn!(
                "TLS certificate verification is DISABLED for Central API calls; never use this in production"
            );
        }
        Self {
            verify_tls,
            connect_timeout,
        }
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(true, Duration::from_secs(10))
    }
}

impl Connector for HttpConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        if !self.verify_tls {
            warn!("building Central transport without TLS certificate verification");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| TransportError::Build(format!("building HTTP client: {e}")))?;
        Ok(Arc::new(HttpTransport { client }))
    }
}

/// A single reusable connection handle.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<InboundResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_reqwest_error)?;

            Ok(InboundResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Map reqwest failures onto the retry-relevant transport kinds.
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::Build(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}
