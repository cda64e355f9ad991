//! Local authorization predicates
//!
//! Operations ask yes/no questions before touching Central. `RolePolicy` is
//! the role table used by the gateway service; anything else implementing
//! `AccessPolicy` can be swapped in.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

/// Yes/no authorization checks consumed by the business operations.
pub trait AccessPolicy: Send + Sync {
    fn can_access(&self, actor: &str, remote_project_id: u64) -> bool;
    fn can_modify(&self, actor: &str, remote_project_id: u64) -> bool;
    fn can_create_project(&self, actor: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Manager,
    DataCollector,
    Viewer,
}

impl Role {
    /// Roles that see and change every project.
    fn is_global(self) -> bool {
        matches!(self, Role::Administrator | Role::Manager)
    }
}

#[derive(Debug, Clone)]
struct Grant {
    role: Role,
    projects: HashSet<u64>,
}

/// Role table keyed by actor id. Unknown actors are denied everything.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    grants: HashMap<String, Grant>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an actor's role and project grants.
    pub fn grant(
        mut self,
        actor: impl Into<String>,
        role: Role,
        projects: impl IntoIterator<Item = u64>,
    ) -> Self {
        self.grants.insert(
            actor.into(),
            Grant {
                role,
                projects: projects.into_iter().collect(),
            },
        );
        self
    }

    pub fn role(&self, actor: &str) -> Option<Role> {
        self.grants.get(actor).map(|g| g.role)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl AccessPolicy for RolePolicy {
    fn can_access(&self, actor: &str, remote_project_id: u64) -> bool {
        self.grants
            .get(actor)
            .is_some_and(|g| g.role.is_global() || g.projects.contains(&remote_project_id))
    }

    fn can_modify(&self, actor: &str, remote_project_id: u64) -> bool {
        self.grants.get(actor).is_some_and(|g| match g.role {
            Role::Administrator | Role::Manager => true,
            Role::DataCollector => g.projects.contains(&remote_project_id),
            Role::Viewer => false,
        })
    }

    fn can_create_project(&self, actor: &str) -> bool {
        self.grants.get(actor).is_some_and(|g| g.role.is_global())
    }
}
