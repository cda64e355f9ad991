//! `/v1` routes
//!
//! Thin handlers: each builds a [`RequestContext`] from the inbound headers,
//! calls one gateway operation and maps its error. The actor comes from
//! `x-actor-id`, set by the authenticating layer in front of this service.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use central_client::{FormUpload, RequestContext};
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::error::{ApiError, Error};

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR: &str = "x-forwarded-for";

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{project_id}", get(get_project).delete(delete_project))
        .route(
            "/projects/{project_id}/forms",
            get(list_forms).post(create_form),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}",
            get(get_form).delete(delete_form),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/submissions",
            get(list_submissions),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/submissions.csv",
            get(export_submissions),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/submissions/{instance_id}",
            get(get_submission),
        )
        .route(
            "/projects/{project_id}/app-users",
            get(list_app_users).post(create_app_user),
        )
        .route(
            "/projects/{project_id}/app-users/{app_user_id}",
            delete(delete_app_user),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/draft",
            get(get_draft).post(create_draft).delete(delete_draft),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/draft/publish",
            post(publish_draft),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/draft/submissions",
            get(list_draft_submissions),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/versions",
            get(list_versions),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/public-links",
            get(list_public_links).post(create_public_link),
        )
        .route(
            "/projects/{project_id}/public-links/{token}",
            delete(revoke_public_link),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/assignments/app-users",
            get(list_assignments),
        )
        .route(
            "/projects/{project_id}/forms/{form_id}/assignments/app-users/{app_user_id}",
            post(assign_app_user).delete(unassign_app_user),
        )
        .route(
            "/projects/{project_id}/app-user-tokens/{token}",
            delete(revoke_app_user_access),
        )
        .route("/local-projects/{local_project_id}/forms", post(upload_form))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Request id from `x-request-id`, or a fresh `req_<uuid>`.
pub fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, REQUEST_ID_HEADER)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().as_simple()))
}

/// Caller identity for one request.
fn context(headers: &HeaderMap) -> ApiResult<RequestContext> {
    let request_id = request_id(headers);
    let actor = header_str(headers, ACTOR_HEADER)
        .ok_or_else(|| ApiError::new(Error::MissingActor, request_id.as_str()))?;

    let mut ctx = RequestContext::new(actor).with_correlation_id(request_id);
    if let Some(ip) = header_str(headers, FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        ctx = ctx.with_source_ip(ip);
    }
    Ok(ctx)
}

/// Run one gateway call and bind any error to the request id.
async fn run<T>(
    ctx: &RequestContext,
    call: impl Future<Output = central_client::Result<T>>,
) -> ApiResult<T> {
    call.await
        .map_err(|e| ApiError::new(e, ctx.correlation_id.as_str()))
}

#[derive(Debug, Deserialize)]
struct NewProject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NewAppUser {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct NewPublicLink {
    display_name: String,
    #[serde(default)]
    once: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    extended: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PublishParams {
    #[serde(default)]
    version: Option<String>,
}

/// Query parameters of a draft upload. An empty body copies the published
/// definition, so `file_name` is only needed with content.
#[derive(Debug, Default, Deserialize)]
struct DraftParams {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    form_id: Option<String>,
    #[serde(default)]
    ignore_warnings: bool,
}

impl DraftParams {
    fn into_upload(self, content: Bytes) -> central_client::Result<Option<FormUpload>> {
        if content.is_empty() {
            return Ok(None);
        }
        let file_name = self.file_name.ok_or_else(|| {
            central_client::Error::InvalidRequest("file_name is required with a draft body".into())
        })?;
        let mut upload = FormUpload::new(file_name, content);
        upload.form_id_fallback = self.form_id;
        upload.ignore_warnings = self.ignore_warnings;
        Ok(Some(upload))
    }
}

/// Query parameters of a raw-body form upload.
#[derive(Debug, Deserialize)]
struct UploadParams {
    file_name: String,
    #[serde(default)]
    form_id: Option<String>,
    #[serde(default)]
    ignore_warnings: bool,
    #[serde(default)]
    publish: bool,
}

impl UploadParams {
    fn into_upload(self, content: Bytes) -> FormUpload {
        let mut upload = FormUpload::new(self.file_name, content);
        upload.form_id_fallback = self.form_id;
        upload.ignore_warnings = self.ignore_warnings;
        upload.publish = self.publish;
        upload
    }
}

async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_accessible_projects(&ctx))
        .await
        .map(Json)
}

async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewProject>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.create_project(&ctx, &body.name))
        .await
        .map(Json)
}

async fn get_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.get_project(&ctx, project_id))
        .await
        .map(Json)
}

async fn delete_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.delete_project(&ctx, project_id))
        .await
        .map(Json)
}

async fn list_forms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_forms(&ctx, project_id))
        .await
        .map(Json)
}

async fn create_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    let upload = params.into_upload(body);
    run(&ctx, state.gateway.create_form(&ctx, project_id, &upload))
        .await
        .map(Json)
}

async fn get_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.get_form(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn delete_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.delete_form(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn list_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_submissions(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn get_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id, instance_id)): Path<(u64, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .get_submission(&ctx, project_id, &form_id, &instance_id),
    )
    .await
    .map(Json)
}

async fn export_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Response> {
    let ctx = context(&headers)?;
    let csv = run(
        &ctx,
        state
            .gateway
            .export_submissions_csv(&ctx, project_id, &form_id),
    )
    .await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    )
        .into_response())
}

async fn list_app_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_app_users(&ctx, project_id))
        .await
        .map(Json)
}

async fn create_app_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
    Json(body): Json<NewAppUser>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .create_app_user(&ctx, project_id, &body.display_name),
    )
    .await
    .map(Json)
}

async fn delete_app_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, app_user_id)): Path<(u64, u64)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .delete_app_user(&ctx, project_id, app_user_id),
    )
    .await
    .map(Json)
}

async fn get_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.get_form_draft(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn create_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
    Query(params): Query<DraftParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    let upload = params
        .into_upload(body)
        .map_err(|e| ApiError::new(e, ctx.correlation_id.as_str()))?;
    run(
        &ctx,
        state
            .gateway
            .create_form_draft(&ctx, project_id, &form_id, upload.as_ref()),
    )
    .await
    .map(Json)
}

async fn delete_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.delete_form_draft(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn publish_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
    Query(params): Query<PublishParams>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state.gateway.publish_form_draft(
            &ctx,
            project_id,
            &form_id,
            params.version.as_deref(),
        ),
    )
    .await
    .map(Json)
}

async fn list_draft_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .list_draft_submissions(&ctx, project_id, &form_id),
    )
    .await
    .map(Json)
}

async fn list_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_form_versions(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn list_public_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .list_public_links(&ctx, project_id, &form_id, params.extended),
    )
    .await
    .map(Json)
}

async fn create_public_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
    Json(body): Json<NewPublicLink>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state.gateway.create_public_link(
            &ctx,
            project_id,
            &form_id,
            &body.display_name,
            body.once,
        ),
    )
    .await
    .map(Json)
}

async fn revoke_public_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, token)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.revoke_public_link(&ctx, project_id, &token))
        .await
        .map(Json)
}

async fn list_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(&ctx, state.gateway.list_form_app_users(&ctx, project_id, &form_id))
        .await
        .map(Json)
}

async fn assign_app_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id, app_user_id)): Path<(u64, String, u64)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .assign_form_to_app_user(&ctx, project_id, &form_id, app_user_id),
    )
    .await
    .map(Json)
}

async fn unassign_app_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, form_id, app_user_id)): Path<(u64, String, u64)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .unassign_form_from_app_user(&ctx, project_id, &form_id, app_user_id),
    )
    .await
    .map(Json)
}

async fn revoke_app_user_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, token)): Path<(u64, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    run(
        &ctx,
        state
            .gateway
            .revoke_app_user_access(&ctx, project_id, &token),
    )
    .await
    .map(Json)
}

async fn upload_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(local_project_id): Path<u64>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let ctx = context(&headers)?;
    let upload = params.into_upload(body);
    run(
        &ctx,
        state.gateway.upload_form(&ctx, local_project_id, &upload),
    )
    .await
    .map(Json)
}
