//! HTTP error responses
//!
//! Every failure leaves the gateway as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Request-level failures of the HTTP surface.
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing or empty x-actor-id header")]
    MissingActor,

    #[error(transparent)]
    Central(#[from] central_client::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        use central_client::Error as C;
        match self {
            Error::MissingActor => StatusCode::UNAUTHORIZED,
            Error::Central(e) => match e {
                C::NoCredentialAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                C::PermissionDenied { .. } | C::Forbidden(_) => StatusCode::FORBIDDEN,
                C::NotFound(_) => StatusCode::NOT_FOUND,
                C::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                C::AuthenticationFailed { .. }
                | C::InvalidResponse(_)
                | C::Status { .. }
                | C::Transport(_) => StatusCode::BAD_GATEWAY,
                C::RetriesExhausted { .. } | C::DeadlineExceeded { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                C::RollbackFailed { .. } | C::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingActor => "missing_actor",
            Error::Central(e) => e.kind(),
        }
    }
}

/// An error bound to the request it failed.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: impl Into<Error>, request_id: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error.kind(),
                "message": self.error.to_string(),
                "request_id": self.request_id,
            }
        });
        (
            self.error.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use central_client::Error as C;
    use std::time::Duration;

    #[test]
    fn central_errors_map_to_statuses() {
        let cases: Vec<(C, StatusCode)> = vec![
            (
                C::NoCredentialAvailable {
                    waited: Duration::from_secs(30),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                C::PermissionDenied {
                    actor: "bob".into(),
                    action: "modify project 3".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (C::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (C::NotFound("form".into()), StatusCode::NOT_FOUND),
            (C::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (
                C::Status {
                    status: 409,
                    body: "conflict".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                C::InvalidResponse("not json".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                C::DeadlineExceeded { attempts: 2 },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                C::RetriesExhausted {
                    attempts: 5,
                    last: Box::new(C::Status {
                        status: 503,
                        body: String::new(),
                    }),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (C::Store("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                C::RollbackFailed {
                    original: Box::new(C::Status {
                        status: 409,
                        body: String::new(),
                    }),
                    rollback: Box::new(C::Forbidden("delete".into())),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let label = format!("{err:?}");
            assert_eq!(Error::from(err).status(), expected, "{label}");
        }
    }

    #[tokio::test]
    async fn error_response_format() {
        let response = ApiError::new(C::NotFound("project 9".into()), "req_abc").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "not_found");
        assert_eq!(json["error"]["request_id"], "req_abc");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("project 9")
        );
    }

    #[test]
    fn missing_actor_is_unauthorized() {
        let err = Error::MissingActor;
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind(), "missing_actor");
    }
}
