//! Local project records and their association with Central projects

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use transport::BoxFuture;

use crate::error::{Error, Result};

/// A project as known locally. `remote_id` is set once a Central project
/// has been created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub remote_id: Option<u64>,
}

/// Persistence for local projects, as far as Central operations need it.
pub trait ProjectStore: Send + Sync {
    fn get(&self, id: u64) -> BoxFuture<'_, Result<Option<LocalProject>>>;

    /// Set or clear the Central project associated with a local project.
    fn set_remote_id(&self, id: u64, remote_id: Option<u64>) -> BoxFuture<'_, Result<()>>;

    /// Associate `remote_id` only if no Central project is associated yet.
    ///
    /// Returns the existing association when there is one, leaving it
    /// untouched. Must be atomic with respect to concurrent callers.
    fn associate_if_unset(&self, id: u64, remote_id: u64)
    -> BoxFuture<'_, Result<Option<u64>>>;
}

#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<u64, LocalProject>>,
}

impl MemoryProjectStore {
    pub fn new(projects: impl IntoIterator<Item = LocalProject>) -> Self {
        Self {
            projects: RwLock::new(projects.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    pub async fn list(&self) -> Vec<LocalProject> {
        let mut projects: Vec<_> = self.projects.read().await.values().cloned().collect();
        projects.sort_by_key(|p| p.id);
        projects
    }
}

impl ProjectStore for MemoryProjectStore {
    fn get(&self, id: u64) -> BoxFuture<'_, Result<Option<LocalProject>>> {
        Box::pin(async move { Ok(self.projects.read().await.get(&id).cloned()) })
    }

    fn set_remote_id(&self, id: u64, remote_id: Option<u64>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut projects = self.projects.write().await;
            let project = projects
                .get_mut(&id)
                .ok_or_else(|| Error::Store(format!("local project {id} does not exist")))?;
            project.remote_id = remote_id;
            Ok(())
        })
    }

    fn associate_if_unset(
        &self,
        id: u64,
        remote_id: u64,
    ) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move {
            let mut projects = self.projects.write().await;
            let project = projects
                .get_mut(&id)
                .ok_or_else(|| Error::Store(format!("local project {id} does not exist")))?;
            if let Some(existing) = project.remote_id {
                return Ok(Some(existing));
            }
            project.remote_id = Some(remote_id);
            Ok(None)
        })
    }
}
