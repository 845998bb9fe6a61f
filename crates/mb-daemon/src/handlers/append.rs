// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/a/{key}` surface: append entries, task and claim listings, webhook
//! subscriptions, copy, and bulk create.

use super::{
    check_replay, finish_mutation, ok_data, request_meta, resolve, validated_tail,
};
use crate::HandlerResult;
use crate::state::AppState;
use axum::extract::{Path as AxPath, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use mb_core::{
    AuditAction, AuditEntry, EventKind, Permission, Priority, WebhookSubscription,
};
use mb_engine::{
    AppendListQuery, AppendRequest, BulkRequest, TaskFilter, TaskState, append_entry,
    bulk_create, get_append, list_appends,
};
use mb_error::{ApiError, ErrorCode};
use mb_keys::hash_key;
use mb_netguard::{SsrfPolicy, check_url_syntax};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Appends
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendsQuery {
    since: Option<String>,
    limit: Option<usize>,
    append: Option<String>,
}

/// `GET /a/{key}/{*path}` — list a file's appends, fetch one by
/// `?append=aN`, or list a folder with per-file append counts.
pub async fn list_file_appends(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    Query(query): Query<AppendsQuery>,
    uri: Uri,
) -> HandlerResult {
    let path = validated_tail(&uri, 2)?;
    let auth = resolve(&state, &key, Permission::Append, Some(&path)).await?;

    if let Some(append_id) = query.append.as_deref() {
        let entry = get_append(&state.engine, &auth, &path, append_id).await?;
        return Ok(ok_data(entry));
    }

    let listing = list_appends(
        &state.engine,
        &auth,
        &path,
        AppendListQuery {
            since: query.since.clone(),
            limit: query.limit,
        },
    )
    .await;
    match listing {
        Ok(listing) => Ok(ok_data(listing)),
        Err(err) if err.code == ErrorCode::FileNotFound => {
            // Folder path: list it with append context.
            let has_children =
                !state.store.list_files(auth.workspace_id, &path).await.is_empty();
            if !has_children {
                return Err(err.into());
            }
            let folders = mb_engine::list_folder(
                &state.engine,
                &auth,
                &path,
                mb_engine::FolderListQuery {
                    with_append_counts: true,
                    limit: query.limit,
                    ..Default::default()
                },
            )
            .await?;
            Ok(ok_data(folders))
        }
        Err(err) => Err(err.into()),
    }
}

/// `POST /a/{key}/{*path}` — append an entry.
pub async fn post_append(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
    axum::Json(body): axum::Json<AppendRequest>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }
    let path = validated_tail(&uri, 2)?;
    let auth = resolve(&state, &key, Permission::Append, Some(&path)).await?;
    let entry = append_entry(&state.engine, &auth, &meta, &path, body).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::CREATED, entry).await
}

// ---------------------------------------------------------------------------
// Orchestration listings
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksQuery {
    status: Option<String>,
    priority: Option<String>,
    labels: Option<String>,
    agent: Option<String>,
    author: Option<String>,
    file: Option<String>,
    folder: Option<String>,
    claimable: Option<String>,
    since: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

fn parse_states(raw: &str) -> Result<BTreeSet<TaskState>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|tag| {
            TaskState::parse(tag)
                .ok_or_else(|| ApiError::invalid_request(format!("unknown status '{tag}'")))
        })
        .collect()
}

fn parse_priorities(raw: &str) -> Result<BTreeSet<Priority>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|tag| {
            Priority::parse(tag)
                .ok_or_else(|| ApiError::invalid_request(format!("unknown priority '{tag}'")))
        })
        .collect()
}

/// `GET /a/{key}/tasks` — the filtered orchestration listing.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    Query(query): Query<TasksQuery>,
) -> HandlerResult {
    let auth = resolve(&state, &key, Permission::Append, None).await?;

    let states = query.status.as_deref().map(parse_states).transpose()?;
    let priorities = query
        .priority
        .as_deref()
        .map(parse_priorities)
        .transpose()?;
    let claimable = match query.claimable.as_deref() {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown claimable '{other}'")).into());
        }
    };

    // Labels filter narrows after projection.
    let wanted_labels: Option<BTreeSet<String>> = query.labels.as_deref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    });

    let mut listing = mb_engine::list_tasks(
        &state.engine,
        &auth,
        TaskFilter {
            states,
            priorities,
            agent: query.agent.clone().or_else(|| query.author.clone()),
            file: query.file.clone(),
            folder: query.folder.clone(),
            claimable,
            limit: query.limit,
            cursor: query.cursor.clone().or_else(|| query.since.clone()),
        },
    )
    .await?;

    if let Some(wanted) = wanted_labels {
        listing
            .tasks
            .retain(|task| wanted.iter().all(|label| task.labels.contains(label)));
    }
    Ok(ok_data(listing))
}

#[derive(Debug, Default, Deserialize)]
pub struct ClaimsQuery {
    folder: Option<String>,
}

/// `GET /a/{key}/claims` — folder-scoped claims view.
pub async fn list_claims(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    Query(query): Query<ClaimsQuery>,
) -> HandlerResult {
    let auth = resolve(&state, &key, Permission::Append, None).await?;
    let claims =
        mb_engine::list_claims(&state.engine, &auth, query.folder.as_deref()).await?;
    Ok(ok_data(json!({ "claims": claims })))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionBody {
    url: String,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    folder_path: Option<String>,
}

/// `POST /a/{key}/subscriptions` — create a webhook subscription.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<SubscriptionBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Append, None).await?;

    // Subscription creation is the rate-limited hot path.
    if let Err(retry) = state.limiter.check(&hash_key(&key), "subscribe").await {
        return Err(ApiError::new(ErrorCode::RateLimited, "slow down")
            .with_detail("retryAfter", retry.0)
            .into());
    }

    check_url_syntax(
        &body.url,
        SsrfPolicy {
            allow_http: state.config.allow_http_webhooks,
            allow_private: false,
        },
    )
    .map_err(|reason| ApiError::invalid_request(format!("webhook url rejected: {reason}")))?;

    let mut events = BTreeSet::new();
    for tag in &body.events {
        let kind: EventKind = serde_json::from_value(json!(tag))
            .map_err(|_| ApiError::invalid_request(format!("unknown event '{tag}'")))?;
        events.insert(kind);
    }
    let folder_path = match body.folder_path.as_deref() {
        Some(raw) => Some(
            mb_path::validate_and_normalize(raw)
                .map_err(|reason| ApiError::invalid_path(reason.to_string()))?,
        ),
        None => None,
    };

    let sub = WebhookSubscription {
        id: Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        url: body.url,
        events,
        secret: body.secret.unwrap_or_else(|| mb_keys::generate_key(32)),
        folder_path,
        created_at: chrono::Utc::now(),
    };
    state.store.insert_webhook(sub.clone()).await;
    state.audit.enqueue(AuditEntry {
        id: Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        action: AuditAction::WebhookCreate,
        resource_type: "webhook".into(),
        resource_id: Some(sub.id.to_string()),
        resource_path: sub.folder_path.clone(),
        actor: auth.prefix.clone(),
        actor_type: "capability".into(),
        metadata: Default::default(),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
        created_at: chrono::Utc::now(),
    });

    finish_mutation(&state, &auth, &meta, StatusCode::CREATED, sub).await
}

/// `GET /a/{key}/subscriptions`.
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
) -> HandlerResult {
    let auth = resolve(&state, &key, Permission::Append, None).await?;
    let subs = state.store.webhooks_for_workspace(auth.workspace_id).await;
    Ok(ok_data(json!({ "subscriptions": subs })))
}

/// `DELETE /a/{key}/subscriptions/{id}`.
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    AxPath((key, id)): AxPath<(String, Uuid)>,
    headers: HeaderMap,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let auth = resolve(&state, &key, Permission::Append, None).await?;
    let sub = state
        .store
        .delete_webhook(auth.workspace_id, id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::WebhookNotFound, "subscription not found"))?;
    state.audit.enqueue(AuditEntry {
        id: Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        action: AuditAction::WebhookDelete,
        resource_type: "webhook".into(),
        resource_id: Some(sub.id.to_string()),
        resource_path: None,
        actor: auth.prefix.clone(),
        actor_type: "capability".into(),
        metadata: Default::default(),
        ip: meta.ip,
        user_agent: meta.user_agent,
        created_at: chrono::Utc::now(),
    });
    state.spawn_persist(auth.workspace_id);
    Ok(ok_data(json!({ "deleted": sub.id })))
}

// ---------------------------------------------------------------------------
// Copy & bulk
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyBody {
    from: String,
    to: String,
}

/// `POST /a/{key}/copy` — copy a file within the key's scope.
pub async fn copy_file(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<CopyBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }
    let auth = resolve(&state, &key, Permission::Append, None).await?;
    let outcome =
        mb_engine::copy_file(&state.engine, &auth, &meta, &body.from, &body.to).await?;
    finish_mutation(&state, &auth, &meta, StatusCode::CREATED, outcome).await
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    files: Vec<BulkRequest>,
}

/// `POST /a/{key}/bulk` — create many files; answers 202 with per-item
/// results.
pub async fn bulk_create_files(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BulkBody>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    if let Some(replayed) = check_replay(&state, &meta).await {
        return Ok(replayed);
    }
    let auth = resolve(&state, &key, Permission::Append, None).await?;
    let results = bulk_create(&state.engine, &auth, &meta, body.files).await?;
    finish_mutation(
        &state,
        &auth,
        &meta,
        StatusCode::ACCEPTED,
        json!({ "results": results }),
    )
    .await
}
