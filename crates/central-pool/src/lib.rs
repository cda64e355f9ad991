//! Credential pool and session cache for Central service accounts
//!
//! A small fixed set of service accounts is shared by many concurrent
//! callers:
//! 1. `CredentialPool::acquire()` hands out an exclusive `Lease`, waiting up
//!    to a timeout when every credential is in use
//! 2. `SessionCache::checkout()` locks that credential's `Session`,
//!    resetting it when it was never opened or its token expired
//! 3. Dropping the `Lease` returns the credential, on every exit path
//!
//! Locks are per credential, so unrelated credentials never serialize.

pub mod cache;
pub mod error;
pub mod pool;

pub use cache::{SessionCache, SessionGuard};
pub use error::{Error, Result};
pub use pool::{CredentialPool, Lease};
