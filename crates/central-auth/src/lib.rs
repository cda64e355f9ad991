//! Central server authentication
//!
//! Owns everything needed to turn a configured service account into a valid
//! bearer token:
//! 1. `Credential` is one statically configured service account
//! 2. `Session` caches a transport plus the account's current `BearerToken`
//! 3. `token::create_session()` performs the `POST /sessions` exchange
//! 4. `Authenticator::ensure_token()` returns the cached token or obtains a
//!    new one, recording it in a `SessionTracker` for support visibility

pub mod authenticator;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod session;
pub mod token;
pub mod tracker;

pub use authenticator::{Authenticator, TokenPolicy};
pub use credentials::Credential;
pub use error::{Error, Result};
pub use session::{BearerToken, Session};
pub use token::{SessionResponse, create_session};
pub use tracker::{DiscardTracker, SessionFile, SessionRecord, SessionTracker};
