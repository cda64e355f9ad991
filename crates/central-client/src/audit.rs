//! Audit recording
//!
//! Every business operation ends with one `AuditRecord`. The recorder is an
//! observer: a failing sink is logged and counted, never returned to the
//! caller, so it cannot mask the operation's own outcome.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};
use transport::BoxFuture;

use crate::error::{Error, Result};

/// One externally visible action, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Map<String, Value>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub correlation_id: String,
}

/// Append-only destination for audit records.
pub trait AuditSink: Send + Sync {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<()>>;
}

/// Writes records through a sink, swallowing sink failures.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, record: AuditRecord) {
        if let Err(e) = self.sink.append(&record).await {
            metrics::counter!("central_audit_failures_total").increment(1);
            error!(
                correlation_id = %record.correlation_id,
                action = %record.action,
                actor = %record.actor_id,
                error = %e,
                "failed to write audit record"
            );
        }
    }
}

/// JSON-lines audit file, one record per line, opened in append mode.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesAuditLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Store(format!("opening audit log {}: {e}", path.display())))?;
        info!(path = %path.display(), "audit log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditLog {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(record)
                .map_err(|e| Error::Store(format!("serializing audit record: {e}")))?;
            line.push(b'\n');

            let mut file = self.file.lock().await;
            file.write_all(&line)
                .await
                .map_err(|e| Error::Store(format!("writing audit record: {e}")))?;
            file.flush()
                .await
                .map_err(|e| Error::Store(format!("flushing audit log: {e}")))
        })
    }
}

/// Emits records as `audit` tracing events. Used when no audit file is set.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let details = Value::Object(record.details.clone());
            info!(
                target: "audit",
                actor = %record.actor_id,
                action = %record.action,
                resource_type = %record.resource_type,
                resource_id = record.resource_id.as_deref().unwrap_or(""),
                success = record.success,
                source_ip = record.source_ip.as_deref().unwrap_or(""),
                correlation_id = %record.correlation_id,
                details = %details,
                "audit"
            );
            Ok(())
        })
    }
}
