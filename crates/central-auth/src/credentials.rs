//! Service-account credentials
//!
//! Loaded once at startup and immutable for the process lifetime. The
//! password never leaves `Secret`, so it is redacted from every log line.

use common::Secret;

/// One of the configured Central service accounts.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: u32,
    pub email: String,
    pub password: Secret<String>,
}

impl Credential {
    pub fn new(id: u32, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            password: Secret::new(password.into()),
        }
    }
}
