//! Form upload with lazy Central project provisioning
//!
//! A local project without a Central counterpart gets one created on its
//! first form upload. If anything after that creation fails, the new Central
//! project is deleted and the local association cleared. A failed rollback
//! leaves the association in place and is reported as `RollbackFailed` so an
//! operator can reconcile it.
//!
//! The association is compare-and-set: of two uploads racing to provision
//! the same local project, the loser deletes its own Central project and
//! uploads into the winner's.

use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};
use transport::Method;

use super::{AuditEntry, Call, Gateway, Permission};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::RequestOptions;
use crate::forms::FormUpload;
use crate::projects::LocalProject;

impl Gateway {
    /// Upload a form into a local project, creating its Central project
    /// first when needed.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id, local_project_id = local_project_id))]
    pub async fn upload_form(
        &self,
        ctx: &RequestContext,
        local_project_id: u64,
        upload: &FormUpload,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("upload_form", "form")
            .resource(format!("local/{local_project_id}"))
            .detail("local_project_id", local_project_id)
            .detail("file_name", upload.file_name.as_str());
        let result = self
            .provision_and_upload(ctx, local_project_id, upload, &mut entry)
            .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    async fn provision_and_upload(
        &self,
        ctx: &RequestContext,
        local_project_id: u64,
        upload: &FormUpload,
        entry: &mut AuditEntry,
    ) -> Result<Value> {
        let options = upload.request_options()?;
        let project = self
            .projects
            .get(local_project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("local project {local_project_id}")))?;

        match project.remote_id {
            Some(remote_id) => self.authorize(ctx, Permission::Modify(remote_id))?,
            None => self.authorize(ctx, Permission::CreateProject)?,
        }

        let mut call = self.open(entry).await?;
        let (remote_id, created) = match project.remote_id {
            Some(remote_id) => (remote_id, false),
            None => self.provision(&mut call, ctx, &project, entry).await?,
        };
        entry.set("remote_project_id", remote_id);
        entry.set("created_remote_project", created);

        let pid = remote_id.to_string();
        let uploaded = async {
            if project.remote_id.is_none() {
                self.authorize(ctx, Permission::Modify(remote_id))?;
            }
            self.send(&mut call, ctx, Method::POST, &["projects", &pid, "forms"], options)
                .await
        }
        .await;

        match uploaded {
            Ok(form) => {
                if let Some(form_id) = form["xmlFormId"].as_str() {
                    entry.resource_id = Some(format!("{remote_id}/{form_id}"));
                }
                Ok(form)
            }
            Err(e) if created => {
                let e = self
                    .roll_back(&mut call, ctx, project.id, remote_id, e, true)
                    .await;
                entry.set(
                    "rolled_back",
                    !matches!(e, Error::RollbackFailed { .. }),
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the Central project for `project` and store the association.
    ///
    /// Returns the Central project to upload into and whether this call
    /// created it. When a concurrent upload associated the local project
    /// first, the project created here is deleted and theirs is used.
    async fn provision(
        &self,
        call: &mut Call,
        ctx: &RequestContext,
        project: &LocalProject,
        entry: &mut AuditEntry,
    ) -> Result<(u64, bool)> {
        let created = self
            .send(
                call,
                ctx,
                Method::POST,
                &["projects"],
                RequestOptions::default().json(&json!({ "name": project.name })),
            )
            .await?;
        let remote_id = created["id"].as_u64().ok_or_else(|| {
            Error::InvalidResponse("created project has no numeric id".to_string())
        })?;
        info!(
            local_project_id = project.id,
            remote_project_id = remote_id,
            "created Central project"
        );

        match self.projects.associate_if_unset(project.id, remote_id).await {
            Ok(None) => Ok((remote_id, true)),
            Ok(Some(existing)) => {
                warn!(
                    local_project_id = project.id,
                    remote_project_id = remote_id,
                    existing_remote_project_id = existing,
                    "local project was provisioned concurrently, discarding duplicate"
                );
                entry.set("discarded_remote_project_id", remote_id);
                if let Err(rollback) = self
                    .undo_creation(call, ctx, project.id, remote_id, false)
                    .await
                {
                    return Err(Error::RollbackFailed {
                        original: Box::new(Error::Store(format!(
                            "local project {} is already associated with Central project {existing}",
                            project.id
                        ))),
                        rollback: Box::new(rollback),
                    });
                }
                Ok((existing, false))
            }
            Err(e) => Err(self
                .roll_back(call, ctx, project.id, remote_id, e, false)
                .await),
        }
    }

    /// Undo a Central project creation after `original` failed the upload.
    ///
    /// Returns `original` when the rollback succeeds, otherwise
    /// `RollbackFailed` carrying both errors.
    async fn roll_back(
        &self,
        call: &mut Call,
        ctx: &RequestContext,
        local_project_id: u64,
        remote_id: u64,
        original: Error,
        clear_association: bool,
    ) -> Error {
        warn!(
            local_project_id,
            remote_project_id = remote_id,
            error = %original,
            "rolling back Central project creation"
        );
        match self
            .undo_creation(call, ctx, local_project_id, remote_id, clear_association)
            .await
        {
            Ok(()) => original,
            Err(rollback) => Error::RollbackFailed {
                original: Box::new(original),
                rollback: Box::new(rollback),
            },
        }
    }

    /// Delete a Central project created earlier in this operation and
    /// optionally clear the local association pointing at it.
    async fn undo_creation(
        &self,
        call: &mut Call,
        ctx: &RequestContext,
        local_project_id: u64,
        remote_id: u64,
        clear_association: bool,
    ) -> Result<()> {
        let pid = remote_id.to_string();
        let undo = async {
            self.send(
                call,
                ctx,
                Method::DELETE,
                &["projects", &pid],
                RequestOptions::default(),
            )
            .await?;
            if clear_association {
                self.projects.set_remote_id(local_project_id, None).await?;
            }
            Ok::<_, Error>(())
        }
        .await;

        match &undo {
            Ok(()) => {
                metrics::counter!("central_rollbacks_total", "result" => "success").increment(1);
                info!(
                    local_project_id,
                    remote_project_id = remote_id,
                    "deleted Central project created by this upload"
                );
            }
            Err(e) => {
                metrics::counter!("central_rollbacks_total", "result" => "failure").increment(1);
                error!(
                    local_project_id,
                    remote_project_id = remote_id,
                    rollback_error = %e,
                    "rollback failed, Central project needs manual cleanup"
                );
            }
        }
        undo
    }
}
