//! Business operations against Central
//!
//! Each operation checks the local access policy, takes one credential lease
//! for its whole duration, runs its executor calls on that credential's
//! session and finishes with exactly one audit record naming the business
//! action, the credential used and, on failure, the error.

mod access;
mod drafts;
mod upload;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use central_pool::{CredentialPool, Lease, SessionCache, SessionGuard};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};
use transport::Method;
use transport::header::{HeaderName, HeaderValue};

use crate::audit::{AuditRecord, AuditRecorder};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::{Executor, RequestOptions};
use crate::forms::FormUpload;
use crate::policy::AccessPolicy;
use crate::projects::ProjectStore;

const EXTENDED_METADATA: &str = "x-extended-metadata";

/// A leased credential and its locked session.
///
/// Field order matters: the session lock is released before the credential
/// goes back to the pool.
struct Call {
    session: SessionGuard,
    lease: Lease,
}

/// Audit record under construction for one operation.
struct AuditEntry {
    action: &'static str,
    resource_type: &'static str,
    resource_id: Option<String>,
    details: Map<String, Value>,
    credential_id: Option<u32>,
}

impl AuditEntry {
    fn new(action: &'static str, resource_type: &'static str) -> Self {
        Self {
            action,
            resource_type,
            resource_id: None,
            details: Map::new(),
            credential_id: None,
        }
    }

    fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }
}

#[derive(Debug, Clone, Copy)]
enum Permission {
    Access(u64),
    Modify(u64),
    CreateProject,
}

impl Permission {
    fn describe(self) -> String {
        match self {
            Permission::Access(id) => format!("access project {id}"),
            Permission::Modify(id) => format!("modify project {id}"),
            Permission::CreateProject => "create projects".to_string(),
        }
    }
}

/// Entry point for every Central operation.
pub struct Gateway {
    pool: CredentialPool,
    sessions: SessionCache,
    executor: Executor,
    audit: AuditRecorder,
    policy: Arc<dyn AccessPolicy>,
    projects: Arc<dyn ProjectStore>,
    acquire_timeout: Duration,
}

impl Gateway {
    pub fn new(
        pool: CredentialPool,
        sessions: SessionCache,
        executor: Executor,
        audit: AuditRecorder,
        policy: Arc<dyn AccessPolicy>,
        projects: Arc<dyn ProjectStore>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            sessions,
            executor,
            audit,
            policy,
            projects,
            acquire_timeout,
        }
    }

    /// Credential pool summary for health reporting.
    pub fn pool_status(&self) -> Value {
        self.pool.status()
    }

    /// Available and total credential counts.
    pub fn pool_occupancy(&self) -> (usize, usize) {
        (self.pool.available(), self.pool.total())
    }

    /// Close every session. Leases still held are unaffected.
    pub async fn close(&self) {
        self.sessions.close_all().await;
        info!(credentials = self.pool.total(), "Central sessions closed");
    }

    // --- Projects ---

    /// Every project visible to the service accounts, unfiltered.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_projects(&self, ctx: &RequestContext) -> Result<Value> {
        let entry = AuditEntry::new("list_projects", "project");
        self.single(ctx, entry, None, Method::GET, &["projects"], RequestOptions::default())
            .await
    }

    /// Projects the actor may access.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_accessible_projects(&self, ctx: &RequestContext) -> Result<Value> {
        let mut entry = AuditEntry::new("list_accessible_projects", "project");
        let result = async {
            let mut call = self.open(&mut entry).await?;
            let all = self
                .send(&mut call, ctx, Method::GET, &["projects"], RequestOptions::default())
                .await?;
            let projects = all.as_array().ok_or_else(|| {
                Error::InvalidResponse("project list is not an array".to_string())
            })?;
            let accessible: Vec<Value> = projects
                .iter()
                .filter(|p| {
                    p["id"]
                        .as_u64()
                        .is_some_and(|id| self.policy.can_access(&ctx.actor_id, id))
                })
                .cloned()
                .collect();
            entry.set("count", accessible.len());
            Ok::<_, Error>(Value::Array(accessible))
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn get_project(&self, ctx: &RequestContext, project_id: u64) -> Result<Value> {
        let entry = AuditEntry::new("get_project", "project").resource(project_id);
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid],
            RequestOptions::default(),
        )
        .await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn create_project(&self, ctx: &RequestContext, name: &str) -> Result<Value> {
        let mut entry = AuditEntry::new("create_project", "project").detail("name", name);
        let result = async {
            if name.trim().is_empty() {
                return Err(Error::InvalidRequest("project name is empty".to_string()));
            }
            self.authorize(ctx, Permission::CreateProject)?;
            let mut call = self.open(&mut entry).await?;
            let project = self
                .send(
                    &mut call,
                    ctx,
                    Method::POST,
                    &["projects"],
                    RequestOptions::default().json(&json!({ "name": name })),
                )
                .await?;
            if let Some(id) = project["id"].as_u64() {
                entry.resource_id = Some(id.to_string());
            }
            Ok::<_, Error>(project)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn delete_project(&self, ctx: &RequestContext, project_id: u64) -> Result<Value> {
        let entry = AuditEntry::new("delete_project", "project").resource(project_id);
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::DELETE,
            &["projects", &pid],
            RequestOptions::default(),
        )
        .await
    }

    // --- Forms ---

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_forms(&self, ctx: &RequestContext, project_id: u64) -> Result<Value> {
        let entry = AuditEntry::new("list_forms", "form").detail("project_id", project_id);
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms"],
            RequestOptions::default(),
        )
        .await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn get_form(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("get_form", "form").resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id],
            RequestOptions::default(),
        )
        .await
    }

    /// Upload a form definition into an existing Central project.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn create_form(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        upload: &FormUpload,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("create_form", "form")
            .resource(format!("{project_id}/new"))
            .detail("file_name", upload.file_name.as_str());
        let result = async {
            let options = upload.request_options()?;
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            let form = self
                .send(&mut call, ctx, Method::POST, &["projects", &pid, "forms"], options)
                .await?;
            if let Some(form_id) = form["xmlFormId"].as_str() {
                entry.resource_id = Some(format!("{project_id}/{form_id}"));
            }
            Ok::<_, Error>(form)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn delete_form(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry =
            AuditEntry::new("delete_form", "form").resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::DELETE,
            &["projects", &pid, "forms", form_id],
            RequestOptions::default(),
        )
        .await
    }

    // --- Submissions ---

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_submissions(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("list_submissions", "submission")
            .resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "submissions"],
            extended_metadata(),
        )
        .await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn get_submission(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        instance_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("get_submission", "submission")
            .resource(format!("{project_id}/{form_id}/{instance_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "submissions", instance_id],
            extended_metadata(),
        )
        .await
    }

    /// All submissions of a form as CSV, returned unparsed.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn export_submissions_csv(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Bytes> {
        let mut entry = AuditEntry::new("export_submissions_csv", "submission")
            .resource(format!("{project_id}/{form_id}"));
        let result = async {
            self.authorize(ctx, Permission::Access(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            let response = self
                .executor
                .execute_raw(
                    call.lease.credential(),
                    &mut call.session,
                    ctx,
                    Method::GET,
                    &["projects", &pid, "forms", form_id, "submissions.csv"],
                    RequestOptions::default(),
                )
                .await?;
            entry.set("bytes", response.body.len());
            Ok::<_, Error>(response.body)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    // --- App users ---

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_app_users(&self, ctx: &RequestContext, project_id: u64) -> Result<Value> {
        let entry = AuditEntry::new("list_app_users", "app_user").detail("project_id", project_id);
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "app-users"],
            RequestOptions::default(),
        )
        .await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn create_app_user(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        display_name: &str,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("create_app_user", "app_user")
            .resource(format!("{project_id}/new"))
            .detail("display_name", display_name);
        let result = async {
            if display_name.trim().is_empty() {
                return Err(Error::InvalidRequest("display name is empty".to_string()));
            }
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            let user = self
                .send(
                    &mut call,
                    ctx,
                    Method::POST,
                    &["projects", &pid, "app-users"],
                    RequestOptions::default().json(&json!({ "displayName": display_name })),
                )
                .await?;
            if let Some(id) = user["id"].as_u64() {
                entry.resource_id = Some(format!("{project_id}/{id}"));
            }
            Ok::<_, Error>(user)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn delete_app_user(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        app_user_id: u64,
    ) -> Result<Value> {
        let entry = AuditEntry::new("delete_app_user", "app_user")
            .resource(format!("{project_id}/{app_user_id}"));
        let pid = project_id.to_string();
        let uid = app_user_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::DELETE,
            &["projects", &pid, "app-users", &uid],
            RequestOptions::default(),
        )
        .await
    }

    // --- Plumbing ---

    /// Permission check, one call, one audit record.
    async fn single(
        &self,
        ctx: &RequestContext,
        mut entry: AuditEntry,
        permission: Option<Permission>,
        method: Method,
        path: &[&str],
        options: RequestOptions,
    ) -> Result<Value> {
        let result = async {
            if let Some(permission) = permission {
                self.authorize(ctx, permission)?;
            }
            let mut call = self.open(&mut entry).await?;
            self.send(&mut call, ctx, method, path, options).await
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    fn authorize(&self, ctx: &RequestContext, permission: Permission) -> Result<()> {
        let actor = ctx.actor_id.as_str();
        let allowed = match permission {
            Permission::Access(id) => self.policy.can_access(actor, id),
            Permission::Modify(id) => self.policy.can_modify(actor, id),
            Permission::CreateProject => self.policy.can_create_project(actor),
        };
        if allowed {
            return Ok(());
        }
        warn!(actor, permission = ?permission, "permission denied");
        Err(Error::PermissionDenied {
            actor: actor.to_string(),
            action: permission.describe(),
        })
    }

    /// Lease a credential and lock its session.
    async fn open(&self, entry: &mut AuditEntry) -> Result<Call> {
        let lease = self.pool.acquire(self.acquire_timeout).await?;
        entry.credential_id = Some(lease.credential_id());
        let session = self.sessions.checkout(lease.credential()).await?;
        Ok(Call { session, lease })
    }

    async fn send(
        &self,
        call: &mut Call,
        ctx: &RequestContext,
        method: Method,
        path: &[&str],
        options: RequestOptions,
    ) -> Result<Value> {
        self.executor
            .execute(
                call.lease.credential(),
                &mut call.session,
                ctx,
                method,
                path,
                options,
            )
            .await
    }

    async fn finish<T>(&self, ctx: &RequestContext, entry: AuditEntry, result: &Result<T>) {
        let AuditEntry {
            action,
            resource_type,
            resource_id,
            mut details,
            credential_id,
        } = entry;
        if let Some(id) = credential_id {
            details.insert("central_account".to_string(), id.into());
        }
        if let Err(e) = result {
            details.insert("error".to_string(), e.to_string().into());
            details.insert("error_type".to_string(), e.kind().into());
        }

        self.audit
            .record(AuditRecord {
                actor_id: ctx.actor_id.clone(),
                action: action.to_string(),
                resource_type: resource_type.to_string(),
                resource_id,
                details,
                success: result.is_ok(),
                timestamp: Utc::now(),
                source_ip: ctx.source_ip.clone(),
                correlation_id: ctx.correlation_id.clone(),
            })
            .await;
    }
}

fn extended_metadata() -> RequestOptions {
    RequestOptions::default().header(
        HeaderName::from_static(EXTENDED_METADATA),
        HeaderValue::from_static("true"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::memory::MemoryAuditLog;
    use crate::projects::MemoryProjectStore;
    use crate::testing::{ScriptedCentral, Step, gateway};

    struct Fixture {
        gateway: Gateway,
        central: Arc<ScriptedCentral>,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture(steps: impl IntoIterator<Item = Step>) -> Fixture {
        let central = ScriptedCentral::new(steps);
        let audit = Arc::new(MemoryAuditLog::default());
        let gateway = gateway(
            &central,
            audit.clone(),
            Arc::new(MemoryProjectStore::default()),
            2,
        );
        Fixture {
            gateway,
            central,
            audit,
        }
    }

    fn ctx(actor: &str) -> RequestContext {
        RequestContext::new(actor).with_source_ip("10.1.2.3")
    }

    #[tokio::test]
    async fn successful_operation_writes_one_audit_record() {
        let f = fixture([Step::Respond(200, r#"{"id":7,"name":"Survey"}"#)]);
        let ctx = ctx("admin");

        let project = f.gateway.get_project(&ctx, 7).await.unwrap();
        assert_eq!(project["name"], "Survey");

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.success);
        assert_eq!(record.action, "get_project");
        assert_eq!(record.resource_type, "project");
        assert_eq!(record.resource_id.as_deref(), Some("7"));
        assert_eq!(record.actor_id, "admin");
        assert_eq!(record.source_ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(record.correlation_id, ctx.correlation_id);
        assert!(record.details["central_account"].is_u64());
        assert!(record.details.get("error").is_none());
    }

    #[tokio::test]
    async fn failed_operation_audits_error_and_credential() {
        let f = fixture([Step::Respond(404, "missing")]);

        let err = f.gateway.get_project(&ctx("admin"), 9).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].details["error_type"], "not_found");
        assert!(records[0].details["error"].as_str().unwrap().contains("projects/9"));
        assert!(records[0].details["central_account"].is_u64());
    }

    #[tokio::test]
    async fn permission_denied_makes_no_remote_call() {
        let f = fixture([]);

        let err = f
            .gateway
            .delete_project(&ctx("guest"), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(f.central.attempts(), 0);
        assert_eq!(f.central.auth_calls(), 0);

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(records[0].details.get("central_account").is_none());
    }

    #[tokio::test]
    async fn accessible_projects_are_filtered_by_policy() {
        let f = fixture([Step::Respond(200, r#"[{"id":7},{"id":8},{"id":9}]"#)]);

        let projects = f
            .gateway
            .list_accessible_projects(&ctx("field"))
            .await
            .unwrap();
        assert_eq!(projects, json!([{"id": 7}]));
        assert_eq!(f.audit.records()[0].details["count"], 1);
    }

    #[tokio::test]
    async fn audit_failure_does_not_change_outcome() {
        let central = ScriptedCentral::new([
            Step::Respond(200, r#"{"id":7}"#),
            Step::Respond(403, "nope"),
        ]);
        let gateway = gateway(
            &central,
            Arc::new(MemoryAuditLog::failing()),
            Arc::new(MemoryProjectStore::default()),
            1,
        );

        assert!(gateway.get_project(&ctx("admin"), 7).await.is_ok());
        assert!(matches!(
            gateway.get_project(&ctx("admin"), 7).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_is_reported_and_audited() {
        let f = fixture([]);
        let _a = f.gateway.pool.acquire(Duration::from_secs(1)).await.unwrap();
        let _b = f.gateway.pool.acquire(Duration::from_secs(1)).await.unwrap();

        let err = f.gateway.list_forms(&ctx("admin"), 7).await.unwrap_err();
        assert!(matches!(err, Error::NoCredentialAvailable { .. }));
        assert_eq!(f.central.attempts(), 0);

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details["error_type"], "no_credential_available");
    }

    #[tokio::test]
    async fn sessions_are_reused_across_operations() {
        let f = fixture([Step::Respond(200, "[]"), Step::Respond(200, "[]")]);
        let ctx = ctx("admin");

        f.gateway.list_forms(&ctx, 7).await.unwrap();
        f.gateway.list_forms(&ctx, 7).await.unwrap();
        assert_eq!(f.central.auth_calls(), 1);
        assert_eq!(f.gateway.pool_status()["credentials_available"], 2);
    }

    #[tokio::test]
    async fn submissions_request_extended_metadata() {
        let f = fixture([Step::Respond(200, "[]")]);

        f.gateway
            .list_submissions(&ctx("guest"), 7, "household")
            .await
            .unwrap();
        let seen = &f.central.seen()[0];
        assert_eq!(
            seen.url,
            "https://central.test/v1/projects/7/forms/household/submissions"
        );
        assert_eq!(seen.headers[EXTENDED_METADATA], "true");
    }

    #[tokio::test]
    async fn csv_export_returns_raw_body() {
        let f = fixture([Step::Respond(200, "instanceID,name\nuuid:1,Ada\n")]);

        let csv = f
            .gateway
            .export_submissions_csv(&ctx("field"), 7, "household")
            .await
            .unwrap();
        assert_eq!(&csv[..], b"instanceID,name\nuuid:1,Ada\n");
        assert!(f.central.seen()[0].url.ends_with("/forms/household/submissions.csv"));
        assert_eq!(f.audit.records()[0].details["bytes"], csv.len());
    }

    #[tokio::test]
    async fn create_form_rejects_bad_extension_before_remote_call() {
        let f = fixture([]);
        let upload = FormUpload::new("survey.pdf", "%PDF");

        let err = f
            .gateway
            .create_form(&ctx("admin"), 7, &upload)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(f.central.attempts(), 0);
        assert_eq!(f.audit.records().len(), 1);
    }

    #[tokio::test]
    async fn create_form_records_form_id() {
        let f = fixture([Step::Respond(200, r#"{"xmlFormId":"household"}"#)]);
        let upload = FormUpload::new("household.xml", "<h:html/>");

        f.gateway
            .create_form(&ctx("field"), 7, &upload)
            .await
            .unwrap();
        let seen = &f.central.seen()[0];
        assert_eq!(seen.method, Method::POST);
        assert!(seen.url.contains("/projects/7/forms?"));
        assert_eq!(
            f.audit.records()[0].resource_id.as_deref(),
            Some("7/household")
        );
    }

    #[tokio::test]
    async fn app_user_lifecycle() {
        let f = fixture([
            Step::Respond(200, r#"{"id":31,"displayName":"Tablet 1"}"#),
            Step::Respond(200, r#"{"success":true}"#),
        ]);
        let ctx = ctx("field");

        let user = f.gateway.create_app_user(&ctx, 7, "Tablet 1").await.unwrap();
        assert_eq!(user["id"], 31);
        f.gateway.delete_app_user(&ctx, 7, 31).await.unwrap();

        let seen = f.central.seen();
        let body: Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(body, json!({"displayName": "Tablet 1"}));
        assert_eq!(seen[1].method, Method::DELETE);
        assert!(seen[1].url.ends_with("/projects/7/app-users/31"));

        let actions: Vec<String> = f.audit.records().into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["create_app_user", "delete_app_user"]);
    }

    #[tokio::test]
    async fn empty_project_name_is_invalid() {
        let f = fixture([]);
        let err = f
            .gateway
            .create_project(&ctx("admin"), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(f.central.attempts(), 0);
    }

    #[tokio::test]
    async fn close_drops_tokens() {
        let f = fixture([Step::Respond(200, "[]")]);
        f.gateway.list_forms(&ctx("admin"), 7).await.unwrap();
        f.gateway.close().await;
        assert!(!f.gateway.sessions.has_token(1).await);
        assert!(!f.gateway.sessions.has_token(2).await);
    }
}
