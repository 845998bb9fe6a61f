// SPDX-License-Identifier: MIT OR Apache-2.0
//! The append engine: validated, ordered insertion into a file's log plus
//! cursor-based listing and single-entry fetch.

use crate::context::{EngineContext, RequestMeta};
use crate::cursor::{decode_rowid, encode_rowid};
use chrono::{DateTime, Duration, Utc};
use mb_auth::Authorization;
use mb_core::{
    AppendEntry, AppendType, AuditAction, EventKind, PREVIEW_MAX_CHARS, Priority,
    content_hash, is_valid_append_id,
};
use mb_error::{ApiError, ApiResult, ErrorCode};
use mb_store::NewAppend;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Default claim lease, in seconds.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 1800;

/// Longest accepted lease: 30 days.
pub const MAX_LEASE_SECS: i64 = 30 * 86_400;

const MAX_AUTHOR_LEN: usize = 128;
const AUTHOR_FORBIDDEN: &[char] = &['<', '>', '"', '\'', '`', '\\', ';', '&'];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub(crate) fn validate_author(author: &str) -> ApiResult<()> {
    let author = author.trim();
    if author.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidAuthor, "author is required"));
    }
    if author.len() > MAX_AUTHOR_LEN {
        return Err(ApiError::new(ErrorCode::InvalidAuthor, "author is too long"));
    }
    if author
        .chars()
        .any(|c| c.is_control() || AUTHOR_FORBIDDEN.contains(&c))
    {
        return Err(ApiError::new(
            ErrorCode::InvalidAuthor,
            "author contains unsafe characters",
        ));
    }
    Ok(())
}

/// Truncate content to the stored preview length on a char boundary.
pub(crate) fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

fn expected_target_kind(kind: AppendType) -> Option<AppendType> {
    match kind {
        AppendType::Claim | AppendType::Response | AppendType::Vote => Some(AppendType::Task),
        AppendType::Answer => Some(AppendType::Blocked),
        AppendType::Renew | AppendType::Cancel => Some(AppendType::Claim),
        AppendType::Task | AppendType::Comment | AppendType::Blocked => None,
    }
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Inputs for `POST /a/{key}/{path}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    /// Entry author.
    pub author: String,
    /// Entry type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form status.
    #[serde(default)]
    pub status: Option<String>,
    /// Priority tag.
    #[serde(default)]
    pub priority: Option<String>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Public id of the referenced entry.
    #[serde(rename = "ref", default)]
    pub target: Option<String>,
    /// Entry content.
    #[serde(default)]
    pub content: Option<String>,
    /// Claim lease length.
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
    /// Explicit lease expiry (wins over the relative form).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Task due date.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

/// Append a validated entry to the file at `path`.
pub async fn append_entry(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path: &str,
    req: AppendRequest,
) -> ApiResult<AppendEntry> {
    if !auth.contains_path(path) {
        return Err(ApiError::not_found());
    }
    validate_author(&req.author)?;

    let kind = AppendType::parse(&req.kind)
        .ok_or_else(|| ApiError::invalid_request(format!("unknown append type '{}'", req.kind)))?;
    let priority = match req.priority.as_deref() {
        Some(tag) => Priority::parse(tag)
            .ok_or_else(|| ApiError::invalid_request(format!("unknown priority '{tag}'")))?,
        None => Priority::default(),
    };

    let file = ctx
        .store
        .file_by_path(auth.workspace_id, path)
        .await
        .map_err(|_| ApiError::file_not_found(path))?;

    // References must resolve within the same file, to the right entry type.
    if let Some(target) = req.target.as_deref() {
        if !is_valid_append_id(target) {
            return Err(ApiError::new(ErrorCode::InvalidAppendId, "malformed ref"));
        }
        let referenced = ctx
            .store
            .append_by_public_id(file.id, target)
            .await
            .map_err(|_| {
                ApiError::invalid_request(format!("ref '{target}' does not exist on this file"))
            })?;
        if let Some(expected) = expected_target_kind(kind)
            && referenced.kind != expected
        {
            return Err(ApiError::invalid_request(format!(
                "{kind} must reference a {expected}",
            )));
        }
    } else if kind == AppendType::Claim {
        return Err(ApiError::invalid_request("claim requires a ref to a task"));
    }

    let lease_secs = req.expires_in_seconds.unwrap_or(DEFAULT_CLAIM_LEASE_SECS);
    if lease_secs.abs() > MAX_LEASE_SECS {
        return Err(ApiError::new(
            ErrorCode::InvalidTimeout,
            "lease length is out of range",
        )
        .with_detail("maxSeconds", MAX_LEASE_SECS));
    }
    let expires_at = if kind == AppendType::Claim {
        Some(
            req.expires_at
                .unwrap_or_else(|| Utc::now() + Duration::seconds(lease_secs)),
        )
    } else {
        req.expires_at
    };

    let status = match (&req.status, kind) {
        (Some(status), _) => Some(status.clone()),
        (None, AppendType::Claim) => Some("active".into()),
        (None, _) => None,
    };

    let entry = ctx
        .store
        .insert_append(
            file.id,
            NewAppend {
                author: req.author.trim().to_string(),
                kind,
                status,
                priority,
                labels: req.labels.into_iter().collect::<BTreeSet<_>>(),
                target: req.target,
                content_preview: req.content.as_deref().map(preview_of),
                content_hash: Some(content_hash(&file.content)),
                expires_at,
                due_at: req.due_at,
            },
        )
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.publish(
        auth.workspace_id,
        EventKind::AppendCreated,
        &file.path,
        Some(entry.id),
        json!({ "appendId": entry.public_id.clone(), "type": entry.kind.as_str() }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::AppendCreate,
        "append",
        Some(entry.public_id.clone()),
        Some(file.path.clone()),
        BTreeMap::from([("type".to_string(), json!(entry.kind.as_str()))]),
    );

    Ok(entry)
}

// ---------------------------------------------------------------------------
// Listing & fetch
// ---------------------------------------------------------------------------

/// Parameters for an append listing.
#[derive(Debug, Clone, Default)]
pub struct AppendListQuery {
    /// Opaque rowid cursor; only strictly newer entries return.
    pub since: Option<String>,
    /// Return the most recent `limit` entries in insertion order.
    pub limit: Option<usize>,
}

/// A page of appends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppendListing {
    /// Owning file path.
    pub path: String,
    /// Entries, oldest first.
    pub appends: Vec<AppendEntry>,
    /// Entries on the file across all pages.
    pub total: usize,
    /// Cursor past the last returned entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// List appends for the file at `path`.
pub async fn list_appends(
    ctx: &EngineContext,
    auth: &Authorization,
    path: &str,
    query: AppendListQuery,
) -> ApiResult<AppendListing> {
    if !auth.contains_path(path) {
        return Err(ApiError::not_found());
    }
    let file = ctx
        .store
        .file_by_path(auth.workspace_id, path)
        .await
        .map_err(|_| ApiError::file_not_found(path))?;

    let since = match query.since.as_deref() {
        Some(cursor) => Some(
            decode_rowid(cursor)
                .ok_or_else(|| ApiError::invalid_request("malformed since cursor"))?,
        ),
        None => None,
    };

    let total = ctx.store.count_appends(file.id).await;
    let appends = ctx.store.appends_for_file(file.id, since, query.limit).await;
    let next_cursor = appends.last().map(|e| encode_rowid(e.rowid));

    Ok(AppendListing {
        path: file.path,
        appends,
        total,
        next_cursor,
    })
}

/// Fetch a single append by public id, enforcing file-scope containment.
pub async fn get_append(
    ctx: &EngineContext,
    auth: &Authorization,
    path: &str,
    append_id: &str,
) -> ApiResult<AppendEntry> {
    if !auth.contains_path(path) {
        return Err(ApiError::not_found());
    }
    if !is_valid_append_id(append_id) {
        return Err(ApiError::new(ErrorCode::InvalidAppendId, "malformed append id"));
    }
    let file = ctx
        .store
        .file_by_path(auth.workspace_id, path)
        .await
        .map_err(|_| ApiError::file_not_found(path))?;
    ctx.store
        .append_by_public_id(file.id, append_id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::AppendNotFound, "append not found"))
}
