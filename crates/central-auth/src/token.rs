//! Session creation against the Central server
//!
//! `POST {base_url}/sessions` with `{email, password}` returns
//! `{token, expiresAt, createdAt}`. The token is then sent as
//! `Authorization: Bearer <token>` on every other call.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transport::header::{CONTENT_TYPE, HeaderValue};
use transport::{Method, OutboundRequest, Transport};

use crate::constants::SESSIONS_PATH;
use crate::credentials::Credential;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct SessionRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Response from the session endpoint.
///
/// `expires_at` is absent on some older servers; callers fall back to the
/// nominal token lifetime.
#[derive(Debug, Deserialize, Serialize)]
pub struct SessionResponse {
    pub token: String,
    #[serde(rename = "expiresAt", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Exchange a credential's email/password for a bearer token.
pub async fn create_session(
    transport: &dyn Transport,
    base_url: &str,
    credential: &Credential,
) -> Result<SessionResponse> {
    let payload = serde_json::to_vec(&SessionRequest {
        email: &credential.email,
        password: credential.password.expose(),
    })
    .map_err(|e| Error::InvalidResponse(format!("encoding session request: {e}")))?;

    let mut request = OutboundRequest::new(
        Method::POST,
        format!("{}/{SESSIONS_PATH}", base_url.trim_end_matches('/')),
    );
    request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request.body = Bytes::from(payload);

    let response = transport.send(request).await?;

    if !(200..300).contains(&response.status) {
        return Err(Error::Rejected {
            credential_id: credential.id,
            status: response.status,
            body: response.body_text(),
        });
    }

    serde_json::from_slice::<SessionResponse>(&response.body)
        .map_err(|e| Error::InvalidResponse(format!("decoding session response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use transport::{BoxFuture, HeaderMap, InboundResponse, TransportError};

    /// Replies with a fixed status/body and remembers the last request.
    struct FixedTransport {
        status: u16,
        body: &'static str,
        seen: Mutex<Option<OutboundRequest>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                seen: Mutex::new(None),
            }
        }
    }

    impl Transport for FixedTransport {
        fn send(
            &self,
            request: OutboundRequest,
        ) -> BoxFuture<'_, transport::Result<InboundResponse>> {
            *self.seen.lock().unwrap() = Some(request);
            let response = InboundResponse {
                status: self.status,
                headers: HeaderMap::new(),
                body: Bytes::from_static(self.body.as_bytes()),
            };
            Box::pin(async move { Ok(response) })
        }
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn send(
            &self,
            _request: OutboundRequest,
        ) -> BoxFuture<'_, transport::Result<InboundResponse>> {
            Box::pin(async { Err(TransportError::Connect("connection refused".into())) })
        }
    }

    fn credential() -> Credential {
        Credential::new(6, "svc@example.org", "pw")
    }

    #[test]
    fn session_response_deserializes() {
        let json = r#"{"createdAt":"2026-01-01T00:00:00.000Z","expiresAt":"2026-01-02T00:00:00.000Z","token":"tok_abc"}"#;
        let response: SessionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.token, "tok_abc");
        assert_eq!(
            response.expires_at.unwrap().to_rfc3339(),
            "2026-01-02T00:00:00+00:00"
        );
    }

    #[test]
    fn session_response_without_expiry() {
        let response: SessionResponse = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert!(response.expires_at.is_none());
    }

    #[tokio::test]
    async fn posts_email_and_password_as_json() {
        let transport = FixedTransport::new(200, r#"{"token":"tok_1"}"#);
        let response = create_session(&transport, "https://central.test/v1/", &credential())
            .await
            .unwrap();
        assert_eq!(response.token, "tok_1");

        let seen = transport.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.url, "https://central.test/v1/sessions");
        let body: serde_json::Value = serde_json::from_slice(&seen.body).unwrap();
        assert_eq!(body["email"], "svc@example.org");
        assert_eq!(body["password"], "pw");
    }

    #[tokio::test]
    async fn rejected_credentials_carry_status() {
        let transport = FixedTransport::new(401, r#"{"message":"bad login"}"#);
        let err = create_session(&transport, "https://central.test/v1", &credential())
            .await
            .unwrap_err();
        match err {
            Error::Rejected {
                credential_id,
                status,
                body,
            } => {
                assert_eq!(credential_id, 6);
                assert_eq!(status, 401);
                assert!(body.contains("bad login"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let transport = FixedTransport::new(200, "<html>");
        let err = create_session(&transport, "https://central.test/v1", &credential())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn network_failure_is_transient() {
        let err = create_session(&RefusingTransport, "https://central.test/v1", &credential())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
