//! Session tracking store
//!
//! Records which credential and token each local user last authenticated
//! with. Support staff read it to answer "which account was this user on";
//! it is never consulted for authorization.
//!
//! `SessionFile` keeps a JSON file keyed by local user. All writes use atomic
//! temp-file + rename, and the file is 0600 because it contains tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use transport::BoxFuture;

use crate::error::{Error, Result};

/// Last known session for one local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub credential_id: u32,
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Destination for session records, upserted by local user.
pub trait SessionTracker: Send + Sync {
    fn upsert<'a>(&'a self, local_user: &'a str, record: SessionRecord)
    -> BoxFuture<'a, Result<()>>;
}

/// Tracker that discards records. Used when no session file is configured.
#[derive(Debug, Default)]
pub struct DiscardTracker;

impl SessionTracker for DiscardTracker {
    fn upsert<'a>(
        &'a self,
        _local_user: &'a str,
        _record: SessionRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// File-backed session tracker.
///
/// The Mutex serializes writes. Reads clone the in-memory state.
pub struct SessionFile {
    path: PathBuf,
    state: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionFile {
    /// Load records from `path`, creating an empty file if it does not exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading session file: {e}")))?;
            let records: HashMap<String, SessionRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), users = records.len(), "loaded session records");
            records
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let records = HashMap::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, local_user: &str) -> Option<SessionRecord> {
        self.state.lock().await.get(local_user).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl SessionTracker for SessionFile {
    fn upsert<'a>(
        &'a self,
        local_user: &'a str,
        record: SessionRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            next.insert(local_user.to_string(), record);
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(local_user, "session record updated");
            Ok(())
        })
    }
}

/// Write records atomically: temp file in the same directory, then rename.
async fn write_atomic(path: &Path, data: &HashMap<String, SessionRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing session records: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("session file path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".sessions.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session records");
    Ok(())
}
