//! Resilient client for the Central API
//!
//! Turns business operations (list forms, upload a form, export submissions)
//! into authenticated, retried and audited calls over a small pool of shared
//! service accounts:
//!
//! - [`Executor`] runs one logical call: token upkeep, per-attempt timeout,
//!   status classification and capped exponential backoff.
//! - [`Gateway`] wraps executor calls into business operations: permission
//!   checks, one credential lease per operation, one audit record per
//!   operation, and rollback of partially provisioned projects.

pub mod audit;
pub mod classify;
pub mod context;
pub mod error;
pub mod executor;
pub mod forms;
pub mod gateway;
pub mod policy;
pub mod projects;
pub mod retry;

#[cfg(test)]
mod testing;

pub use audit::{AuditRecord, AuditRecorder, AuditSink, JsonLinesAuditLog, TracingAuditSink};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use executor::{Executor, RequestOptions};
pub use forms::{FormSource, FormUpload};
pub use gateway::Gateway;
pub use policy::{AccessPolicy, Role, RolePolicy};
pub use projects::{LocalProject, MemoryProjectStore, ProjectStore};
pub use retry::{RetryContext, RetryPolicy};
