//! Caller identity and correlation ids for one operation

/// Who is asking, from where, under which correlation id.
///
/// Passed to every operation and carried into logs, audit records and the
/// session tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor_id: String,
    pub source_ip: Option<String>,
    pub correlation_id: String,
}

impl RequestContext {
    /// New context with a fresh `req_<uuid>` correlation id.
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            source_ip: None,
            correlation_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}
