// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/w/{key}` surface: upsert, delete, recover, move, rename, rotate,
//! share, folders, and workspace claiming.

use super::read::{ReadQuery, serve_read};
use super::{
    check_replay, finish_mutation, if_match_header, request_meta, resolve, target_path,
    validated_tail,
};
use crate::HandlerResult;
use crate::state::AppState;
use axum::extract::{Path as AxPath, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use mb_core::{Permission, Settings};
use mb_engine::UpsertRequest;
use mb_error::ApiError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Body of `PUT /w/{key}/{path}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutBody {
    /// New content.
    #[serde(default)]
    pub content: String,
    /// Optional settings replacement.
    #[serde(default)]
    pub settings: Option<Settings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    permanent: Option<String>,
    confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverBody {
    #[serde(default)]
    rotate_keys: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    #[serde(default)]
    from: Option<String>,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsBody {
    settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBody {
    path: String,
    permission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderBody {
    path: String,
    #[serde(default)]
    settings: Option<Settings>,
    #[serde(default)]
    recursive: bool,
}

async fn put_inner(
    state: Arc<AppState>,
    key: String,
    tail: Option<String>,
    headers: HeaderMap,
    body: PutBody,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }

    let path_hint = tail.clone().filter(|p| p != "/");
    let auth = resolve(&state, &key, Permission::Write, path_hint.as_deref()).await?;
    let path = target_path(&auth, tail)?;

    let outcome = mb_engine::upsert(
        &state.engine,
        &auth,
        &meta,
        UpsertRequest {
            path,
            content: body.content,
            if_match: if_match_header(&headers),
            settings: body.settings,
        },
    )
    .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut resp = finish_mutation(&state, &auth, &meta, status, outcome).await?;
    if let Ok(value) =
        axum::http::HeaderValue::from_str(&state.config.file_max_size_bytes.to_string())
    {
        resp.headers_mut().insert("x-content-size-limit", value);
    }
    Ok(resp)
}

/// `PUT /w/{key}/{*path}` — upsert at an explicit path.
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
    axum::Json(body): axum::Json<PutBody>,
) -> HandlerResult {
    let tail = validated_tail(&uri, 2)?;
    put_inner(state, key, Some(tail), headers, body).await
}

/// `PUT /w/{key}` — upsert the file behind a file-scope key.
pub async fn put_file_root(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<PutBody>,
) -> HandlerResult {
    put_inner(state, key, None, headers, body).await
}

async fn delete_inner(
    state: Arc<AppState>,
    key: String,
    tail: Option<String>,
    headers: HeaderMap,
    query: DeleteQuery,
) -> HandlerResult {
    let permanent = match query.permanent.as_deref() {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown permanent '{other}'")).into());
        }
    };
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }

    let path_hint = tail.clone().filter(|p| p != "/");
    let auth = resolve(&state, &key, Permission::Write, path_hint.as_deref()).await?;
    let path = target_path(&auth, tail)?;

    // A supplied confirmation path must name the target exactly.
    if permanent
        && let Some(confirm) = query.confirm.as_deref()
        && mb_path::normalize(confirm) != path
    {
        return Err(ApiError::new(
            mb_error::ErrorCode::ConfirmPathMismatch,
            "confirmation path does not match the target",
        )
        .into());
    }

    let outcome = mb_engine::delete_file(&state.engine, &auth, &meta, &path, permanent).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::OK, outcome).await
}

/// `DELETE /w/{key}/{*path}`.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    Query(query): Query<DeleteQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> HandlerResult {
    let tail = validated_tail(&uri, 2)?;
    delete_inner(state, key, Some(tail), headers, query).await
}

/// `DELETE /w/{key}` — delete the file behind a file-scope key.
pub async fn delete_file_root(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    Query(query): Query<DeleteQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    delete_inner(state, key, None, headers, query).await
}

/// `GET /w/{key}` — write keys may read their scope too.
pub async fn write_get_root(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    Query(query): Query<ReadQuery>,
) -> HandlerResult {
    let auth = resolve(&state, &key, Permission::Read, None).await?;
    match auth.file_scope_path().map(str::to_string) {
        Some(path) => serve_read(&state, &auth, &path, &query, false).await,
        None => {
            let prefix = auth.effective_prefix().to_string();
            serve_read(&state, &auth, &prefix, &query, false).await
        }
    }
}

/// `GET /w/{key}/{*path}`.
pub async fn write_get_path(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    Query(query): Query<ReadQuery>,
    uri: Uri,
) -> HandlerResult {
    let path = validated_tail(&uri, 2)?;
    let auth = resolve(&state, &key, Permission::Read, Some(&path)).await?;
    serve_read(&state, &auth, &path, &query, false).await
}

/// `POST /w/{key}/recover` — restore the soft-deleted file behind a
/// file-scope key, optionally rotating its capability URLs.
pub async fn recover_file(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    body: Option<axum::Json<RecoverBody>>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let rotate = body.map(|b| b.0.rotate_keys).unwrap_or(false);
    let outcome = mb_engine::recover_file(&state.engine, &auth, &meta, rotate).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::OK, outcome).await
}

/// `POST /w/{key}/move`.
pub async fn move_file(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<MoveBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let outcome =
        mb_engine::move_file(&state.engine, &auth, &meta, body.from.as_deref(), &body.to).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::OK, outcome).await
}

/// `PATCH /w/{key}` — rename the file behind a file-scope key.
pub async fn rename_file(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<RenameBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let outcome = mb_engine::rename_file(&state.engine, &auth, &meta, &body.name).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::OK, outcome).await
}

/// `PATCH /w/{key}/{*path}` — replace the file's settings object.
pub async fn patch_file_settings(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
    axum::Json(body): axum::Json<SettingsBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let path = validated_tail(&uri, 2)?;
    let auth = resolve(&state, &key, Permission::Write, Some(&path)).await?;
    let view =
        mb_engine::update_settings(&state.engine, &auth, &meta, &path, body.settings).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::OK, view).await
}

/// `POST /w/{key}/rotate` — revoke and replace the file's key triple.
pub async fn rotate_keys(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let minted = mb_engine::rotate_file_keys(&state.engine, &auth, &meta).await?;
    let base = state.base_url();
    let urls = json!({
        "read": format!("{base}/r/{}", minted.read),
        "append": format!("{base}/a/{}", minted.append),
        "write": format!("{base}/w/{}", minted.write),
    });
    let data = json!({ "keys": minted, "urls": urls });
    finish_mutation(&state, &auth, &meta, StatusCode::OK, data).await
}

/// `POST /w/{key}/share` — mint a scoped capability URL.
pub async fn share(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ShareBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let permission = match body.permission.as_str() {
        "read" => Permission::Read,
        "append" => Permission::Append,
        "write" => Permission::Write,
        other => {
            return Err(ApiError::invalid_request(format!("unknown permission '{other}'")).into());
        }
    };
    let outcome =
        mb_engine::share_scope(&state.engine, &auth, &meta, &body.path, permission).await?;
    let base = state.base_url();
    let surface = match permission {
        Permission::Read => "r",
        Permission::Append => "a",
        Permission::Write => "w",
    };
    let url = format!("{base}/{surface}/{}", outcome.key);
    let data = json!({
        "key": outcome.key,
        "permission": outcome.permission,
        "scopeType": outcome.scope_type,
        "scopePath": outcome.scope_path,
        "url": url,
    });
    finish_mutation(&state, &auth, &meta, StatusCode::CREATED, data).await
}

/// `POST /w/{key}/folders` — create an explicit folder.
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<FolderBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let folder =
        mb_engine::create_folder(&state.engine, &auth, &meta, &body.path, body.settings).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::CREATED, folder).await
}

/// `DELETE /w/{key}/folders` — delete a folder, recursively on request.
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<FolderBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let deleted =
        mb_engine::delete_folder(&state.engine, &auth, &meta, &body.path, body.recursive).await?;
    finish_mutation(
        &state,
        &auth,
        &meta,
        StatusCode::OK,
        json!({ "path": body.path, "deletedFiles": deleted }),
    )
    .await
}

/// `POST /w/{key}/claim` — bind the workspace to the authenticated owner.
///
/// Session authentication itself lives outside the core; possession of the
/// workspace write key is what authorizes the bind.
pub async fn claim_workspace(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Write, None).await?;
    let workspace = state
        .store
        .claim_workspace(auth.workspace_id)
        .await
        .map_err(|_| ApiError::new(mb_error::ErrorCode::WorkspaceNotFound, "workspace not found"))?;
    state.audit.log_sync(mb_core::AuditEntry {
        id: uuid::Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        action: mb_core::AuditAction::WorkspaceClaim,
        resource_type: "workspace".into(),
        resource_id: Some(workspace.id.to_string()),
        resource_path: None,
        actor: auth.prefix.clone(),
        actor_type: "capability".into(),
        metadata: Default::default(),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
        created_at: chrono::Utc::now(),
    })
    .await;
    finish_mutation(
        &state,
        &auth,
        &meta,
        StatusCode::OK,
        json!({ "workspaceId": workspace.id, "claimedAt": workspace.claimed_at }),
    )
    .await
}
