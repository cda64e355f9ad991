//! Form drafts and published versions
//!
//! A draft is the next definition of an existing form. It can be tested with
//! draft submissions, replaced, discarded, or published as a new version.

use serde_json::Value;
use tracing::instrument;
use transport::Method;

use super::{AuditEntry, Gateway, Permission};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::RequestOptions;
use crate::forms::FormUpload;

impl Gateway {
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn get_form_draft(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry =
            AuditEntry::new("get_form_draft", "form_draft").resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "draft"],
            RequestOptions::default(),
        )
        .await
    }

    /// Create a draft of `form_id`, or replace the current one.
    ///
    /// Without an upload Central copies the published definition.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn create_form_draft(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        upload: Option<&FormUpload>,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("create_form_draft", "form_draft")
            .resource(format!("{project_id}/{form_id}"));
        if let Some(upload) = upload {
            entry.set("file_name", upload.file_name.as_str());
        }
        let result = async {
            let options = match upload {
                Some(upload) => upload.draft_request_options()?,
                None => RequestOptions::default(),
            };
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            self.send(
                &mut call,
                ctx,
                Method::POST,
                &["projects", &pid, "forms", form_id, "draft"],
                options,
            )
            .await
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn delete_form_draft(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("delete_form_draft", "form_draft")
            .resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::DELETE,
            &["projects", &pid, "forms", form_id, "draft"],
            RequestOptions::default(),
        )
        .await
    }

    /// Publish the draft. `version` replaces the version string declared in
    /// the definition; Central rejects a version that was already used.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn publish_form_draft(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        version: Option<&str>,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("publish_form_draft", "form_draft")
            .resource(format!("{project_id}/{form_id}"));
        if let Some(version) = version {
            entry.set("version", version);
        }
        let result = async {
            let mut options = RequestOptions::default();
            if let Some(version) = version {
                if version.trim().is_empty() {
                    return Err(Error::InvalidRequest("form version is empty".to_string()));
                }
                options = options.query("version", version);
            }
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            self.send(
                &mut call,
                ctx,
                Method::POST,
                &["projects", &pid, "forms", form_id, "draft", "publish"],
                options,
            )
            .await
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    /// Test submissions made against the draft.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_draft_submissions(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("list_draft_submissions", "submission")
            .resource(format!("{project_id}/{form_id}/draft"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "draft", "submissions"],
            RequestOptions::default(),
        )
        .await
    }

    /// Every published version of a form, newest first.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_form_versions(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("list_form_versions", "form")
            .resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "versions"],
            RequestOptions::default(),
        )
        .await
    }
}
