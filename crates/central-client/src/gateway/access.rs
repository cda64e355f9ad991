//! Form access: public links, app-user assignments, token revocation
//!
//! Public links and app users both authenticate to Central with a session
//! token. Revoking either deletes that session.

use serde_json::{Value, json};
use tracing::{instrument, warn};
use transport::Method;

use super::{AuditEntry, Call, Gateway, Permission, extended_metadata};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::RequestOptions;

/// Length of Central session tokens.
const TOKEN_LEN: usize = 64;

/// Characters of a token kept in audit records.
const TOKEN_PREVIEW: usize = 10;

fn check_token(token: &str) -> Result<()> {
    if token.len() != TOKEN_LEN || !token.chars().all(|c| c.is_ascii_graphic()) {
        return Err(Error::InvalidRequest(format!(
            "session token must be {TOKEN_LEN} printable ASCII characters"
        )));
    }
    Ok(())
}

fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(TOKEN_PREVIEW).collect();
    format!("{head}...")
}

impl Gateway {
    // --- Public links ---

    /// Create a public access link. `once` limits it to a single submission.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn create_public_link(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        display_name: &str,
        once: bool,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("create_public_link", "public_link")
            .resource(format!("{project_id}/{form_id}"))
            .detail("display_name", display_name)
            .detail("once", once);
        let result = async {
            if display_name.trim().is_empty() {
                return Err(Error::InvalidRequest("display name is empty".to_string()));
            }
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            let mut link = self
                .send(
                    &mut call,
                    ctx,
                    Method::POST,
                    &["projects", &pid, "forms", form_id, "public-links"],
                    RequestOptions::default()
                        .json(&json!({ "displayName": display_name, "once": once })),
                )
                .await?;
            if let Some(id) = link["id"].as_u64() {
                entry.set("link_id", id);
            }
            let links = std::slice::from_mut(&mut link);
            self.attach_public_urls(&mut call, ctx, project_id, form_id, links)
                .await;
            Ok::<_, Error>(link)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_public_links(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        extended: bool,
    ) -> Result<Value> {
        let mut entry = AuditEntry::new("list_public_links", "public_link")
            .resource(format!("{project_id}/{form_id}"));
        let result = async {
            self.authorize(ctx, Permission::Access(project_id))?;
            let mut call = self.open(&mut entry).await?;
            let pid = project_id.to_string();
            let options = if extended {
                extended_metadata()
            } else {
                RequestOptions::default()
            };
            let mut links = self
                .send(
                    &mut call,
                    ctx,
                    Method::GET,
                    &["projects", &pid, "forms", form_id, "public-links"],
                    options,
                )
                .await?;
            if let Some(items) = links.as_array_mut() {
                entry.set("count", items.len());
                self.attach_public_urls(&mut call, ctx, project_id, form_id, items)
                    .await;
            }
            Ok::<_, Error>(links)
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    /// Revoke a public link by deleting its session.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn revoke_public_link(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        token: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("revoke_public_link", "public_link").resource(project_id);
        self.revoke_session(ctx, entry, project_id, token).await
    }

    // --- App users ---

    /// Revoke an app user's current token. The app user stays and can be
    /// issued a new one.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn revoke_app_user_access(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        token: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("revoke_app_user", "app_user").resource(project_id);
        self.revoke_session(ctx, entry, project_id, token).await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn assign_form_to_app_user(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        app_user_id: u64,
    ) -> Result<Value> {
        let entry = AuditEntry::new("assign_form_to_app_user", "form_assignment")
            .resource(format!("{project_id}/{form_id}/{app_user_id}"));
        let pid = project_id.to_string();
        let uid = app_user_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::POST,
            &["projects", &pid, "forms", form_id, "assignments", "app-user", &uid],
            RequestOptions::default(),
        )
        .await
    }

    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn unassign_form_from_app_user(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        app_user_id: u64,
    ) -> Result<Value> {
        let entry = AuditEntry::new("unassign_form_from_app_user", "form_assignment")
            .resource(format!("{project_id}/{form_id}/{app_user_id}"));
        let pid = project_id.to_string();
        let uid = app_user_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Modify(project_id)),
            Method::DELETE,
            &["projects", &pid, "forms", form_id, "assignments", "app-user", &uid],
            RequestOptions::default(),
        )
        .await
    }

    /// App users allowed to submit to a form.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id, actor = %ctx.actor_id))]
    pub async fn list_form_app_users(
        &self,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
    ) -> Result<Value> {
        let entry = AuditEntry::new("list_form_app_users", "form_assignment")
            .resource(format!("{project_id}/{form_id}"));
        let pid = project_id.to_string();
        self.single(
            ctx,
            entry,
            Some(Permission::Access(project_id)),
            Method::GET,
            &["projects", &pid, "forms", form_id, "assignments", "app-user"],
            RequestOptions::default(),
        )
        .await
    }

    // --- Helpers ---

    async fn revoke_session(
        &self,
        ctx: &RequestContext,
        mut entry: AuditEntry,
        project_id: u64,
        token: &str,
    ) -> Result<Value> {
        entry.set("token", token_preview(token));
        let result = async {
            check_token(token)?;
            self.authorize(ctx, Permission::Modify(project_id))?;
            let mut call = self.open(&mut entry).await?;
            self.send(
                &mut call,
                ctx,
                Method::DELETE,
                &["sessions", token],
                RequestOptions::default(),
            )
            .await
        }
        .await;
        self.finish(ctx, entry, &result).await;
        result
    }

    /// Add `public_url` to every link carrying a token. Best effort: the
    /// links are returned as they are when the form lookup fails.
    async fn attach_public_urls(
        &self,
        call: &mut Call,
        ctx: &RequestContext,
        project_id: u64,
        form_id: &str,
        links: &mut [Value],
    ) {
        if !links.iter().any(|l| l["token"].is_string()) {
            return;
        }
        let pid = project_id.to_string();
        let form = match self
            .send(
                call,
                ctx,
                Method::GET,
                &["projects", &pid, "forms", form_id],
                RequestOptions::default(),
            )
            .await
        {
            Ok(form) => form,
            Err(e) => {
                warn!(project_id, form_id, error = %e, "could not look up form for public link URLs");
                return;
            }
        };
        let Some(enketo_id) = form["enketoId"].as_str() else {
            return;
        };
        for link in links {
            if let Some(token) = link["token"].as_str() {
                let url = self.executor.public_link_url(enketo_id, token);
                link["public_url"] = Value::String(url);
            }
        }
    }
}
