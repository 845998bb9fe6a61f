// SPDX-License-Identifier: MIT OR Apache-2.0
//! The file mutation engine: upsert under ETag + quota rules, soft delete
//! with a recovery window, move / rename / copy / bulk create, settings,
//! capability rotation and sharing, and folder operations.
//!
//! Callers hand in an already-resolved [`Authorization`]; raw-URL traversal
//! screening and path validation for URL-borne paths happen at the HTTP
//! edge, while body-borne paths (move / copy destinations) are validated
//! here.

use crate::context::{EngineContext, RequestMeta};
use crate::cursor::{decode_offset, encode_offset, decode_rowid, encode_rowid};
use crate::frontmatter::parse_frontmatter;
use crate::orchestrate::{TaskStats, task_stats};
use chrono::{DateTime, Utc};
use mb_auth::{Authorization, mint_capability};
use mb_core::{
    AppendEntry, AuditAction, EventKind, FileRecord, FolderRecord, Permission, ScopeType,
    Settings, content_hash, etag_for, etag_matches,
};
use mb_error::{ApiError, ApiResult, ErrorCode};
use mb_store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn ensure_in_scope(auth: &Authorization, path: &str) -> ApiResult<()> {
    if auth.contains_path(path) {
        Ok(())
    } else {
        // Scope misses hide as not-found.
        Err(ApiError::not_found())
    }
}

fn validate_body_path(raw: &str) -> ApiResult<String> {
    mb_path::validate_and_normalize(raw)
        .map_err(|reason| ApiError::invalid_path(reason.to_string()))
}

fn quota_check(
    ctx: &EngineContext,
    current_usage: u64,
    new_size: u64,
    existing_size: u64,
) -> ApiResult<()> {
    if current_usage + new_size.saturating_sub(existing_size) > ctx.limits.workspace_quota_bytes {
        return Err(ApiError::new(
            ErrorCode::QuotaExceeded,
            "workspace storage quota exceeded",
        )
        .with_detail("quota", ctx.limits.workspace_quota_bytes));
    }
    Ok(())
}

fn size_check(ctx: &EngineContext, content: &str) -> ApiResult<()> {
    if content.len() as u64 > ctx.limits.file_max_bytes {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            "content exceeds the per-file size cap",
        )
        .with_detail("limit", ctx.limits.file_max_bytes));
    }
    Ok(())
}

async fn live_file(ctx: &EngineContext, auth: &Authorization, path: &str) -> ApiResult<FileRecord> {
    match ctx.store.file_by_path(auth.workspace_id, path).await {
        Ok(file) => Ok(file),
        Err(StoreError::FileNotFound) => {
            let deleted = ctx.store.deleted_file_by_path(auth.workspace_id, path).await;
            if let Some(deleted) = deleted {
                let recoverable = deleted
                    .recovery_deadline()
                    .map(|deadline| deadline > Utc::now())
                    .unwrap_or(false);
                if recoverable {
                    return Err(ApiError::new(ErrorCode::FileDeleted, "file is deleted")
                        .with_detail("recoverable", true)
                        .with_detail("expiresAt", deleted.recovery_deadline()));
                }
            }
            Err(ApiError::file_not_found(path))
        }
        Err(other) => Err(ApiError::server_error(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

/// Inputs for `PUT /w/{key}/{path}`.
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    /// Canonical target path.
    pub path: String,
    /// New content.
    pub content: String,
    /// `If-Match` header value, when conditional.
    pub if_match: Option<String>,
    /// Optional settings replacement.
    pub settings: Option<Settings>,
}

/// Result of an upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    /// Whether a new row was created (201) or an existing one updated (200).
    pub created: bool,
    /// Canonical path.
    pub path: String,
    /// Content size in bytes.
    pub size: u64,
    /// Strong content ETag.
    pub etag: String,
    /// Appends whose recorded content hash no longer matches.
    pub appends_stale: usize,
}

/// Create or update the file at `req.path`.
pub async fn upsert(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    req: UpsertRequest,
) -> ApiResult<UpsertOutcome> {
    ensure_in_scope(auth, &req.path)?;
    size_check(ctx, &req.content)?;

    let workspace = ctx
        .store
        .workspace(auth.workspace_id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::WorkspaceNotFound, "workspace not found"))?;

    match ctx.store.file_by_path(auth.workspace_id, &req.path).await {
        Ok(existing) => {
            apply_update(ctx, auth, meta, &workspace, existing, req, false).await
        }
        Err(StoreError::FileNotFound) => {
            if req.if_match.is_some() {
                // Conditional update against a file that is not there.
                return Err(ApiError::new(ErrorCode::Conflict, "precondition failed"));
            }
            quota_check(ctx, workspace.storage_used_bytes, req.content.len() as u64, 0)?;
            let now = Utc::now();
            let file = FileRecord {
                id: Uuid::new_v4(),
                workspace_id: auth.workspace_id,
                path: req.path.clone(),
                content: req.content.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
                settings: req.settings.clone(),
            };
            match ctx.store.insert_file(file.clone()).await {
                Ok(()) => {
                    let size = file.size_bytes();
                    let _ = ctx.store.adjust_storage(auth.workspace_id, size as i64).await;
                    let etag = etag_for(&file.content);
                    ctx.publish(
                        auth.workspace_id,
                        EventKind::FileCreated,
                        &file.path,
                        Some(file.id),
                        json!({ "size": size, "etag": etag.clone() }),
                    );
                    ctx.audit_event(
                        auth,
                        meta,
                        AuditAction::FileCreate,
                        "file",
                        Some(file.id.to_string()),
                        Some(file.path.clone()),
                        BTreeMap::new(),
                    );
                    Ok(UpsertOutcome {
                        created: true,
                        path: file.path,
                        size,
                        etag,
                        appends_stale: 0,
                    })
                }
                Err(StoreError::PathTaken { winner, .. }) => {
                    // Lost the insert race: re-read the winning row and apply
                    // our content as an update.
                    tracing::debug!(path = %req.path, "insert race lost; retrying as update");
                    let winner_row = ctx
                        .store
                        .file_by_id(winner)
                        .await
                        .map_err(|e| ApiError::server_error(e.to_string()))?;
                    apply_update(ctx, auth, meta, &workspace, winner_row, req, true).await
                }
                Err(other) => Err(ApiError::server_error(other.to_string())),
            }
        }
        Err(other) => Err(ApiError::server_error(other.to_string())),
    }
}

async fn apply_update(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    workspace: &mb_core::Workspace,
    mut file: FileRecord,
    req: UpsertRequest,
    lost_race: bool,
) -> ApiResult<UpsertOutcome> {
    let current_etag = etag_for(&file.content);
    if !lost_race
        && let Some(if_match) = req.if_match.as_deref()
        && !etag_matches(if_match, &current_etag)
    {
        return Err(ApiError::new(ErrorCode::Conflict, "precondition failed")
            .with_detail("currentEtag", current_etag));
    }

    let old_size = file.size_bytes();
    let new_size = req.content.len() as u64;
    quota_check(ctx, workspace.storage_used_bytes, new_size, old_size)?;

    file.content = req.content;
    file.updated_at = Utc::now();
    if let Some(settings) = req.settings {
        file.settings = Some(settings);
    }
    ctx.store
        .update_file(file.clone())
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    let delta = new_size as i64 - old_size as i64;
    let _ = ctx.store.adjust_storage(auth.workspace_id, delta).await;

    let etag = etag_for(&file.content);
    let appends_stale = ctx
        .store
        .count_stale_appends(file.id, &content_hash(&file.content))
        .await;

    ctx.publish(
        auth.workspace_id,
        EventKind::FileUpdated,
        &file.path,
        Some(file.id),
        json!({ "size": new_size, "etag": etag.clone(), "appendsStale": appends_stale }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileUpdate,
        "file",
        Some(file.id.to_string()),
        Some(file.path.clone()),
        BTreeMap::new(),
    );

    Ok(UpsertOutcome {
        created: false,
        path: file.path,
        size: new_size,
        etag,
        appends_stale,
    })
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// Read format selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadFormat {
    /// Raw content.
    #[default]
    Raw,
    /// Frontmatter split from the body.
    Parsed,
}

/// Options for a file read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// `format` query parameter.
    pub format: ReadFormat,
    /// `include=stats`.
    pub include_stats: bool,
    /// Trailing appends to embed (`appends=N`).
    pub appends: Option<usize>,
    /// Append cursor (`since=`).
    pub since: Option<String>,
}

/// A file read response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    /// Canonical path.
    pub path: String,
    /// Raw content.
    pub content: String,
    /// Strong ETag.
    pub etag: String,
    /// Content size in bytes.
    pub size: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Settings, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    /// Parsed frontmatter (`format=parsed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontmatter: Option<BTreeMap<String, serde_json::Value>>,
    /// Body with frontmatter stripped (`format=parsed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Total appends on the file.
    pub append_count: usize,
    /// Embedded appends, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appends: Option<Vec<AppendEntry>>,
    /// Cursor past the last embedded append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Task statistics (`include=stats`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<TaskStats>,
}

/// Read the file at `path`.
pub async fn read_file(
    ctx: &EngineContext,
    auth: &Authorization,
    path: &str,
    opts: ReadOptions,
) -> ApiResult<FileView> {
    ensure_in_scope(auth, path)?;
    let file = live_file(ctx, auth, path).await?;

    let since_rowid = match opts.since.as_deref() {
        Some(cursor) => Some(
            decode_rowid(cursor)
                .ok_or_else(|| ApiError::invalid_request("malformed since cursor"))?,
        ),
        None => None,
    };

    let append_count = ctx.store.count_appends(file.id).await;
    let (appends, next_cursor) = if opts.appends.is_some() || since_rowid.is_some() {
        let entries = ctx
            .store
            .appends_for_file(file.id, since_rowid, opts.appends)
            .await;
        let cursor = entries.last().map(|e| encode_rowid(e.rowid));
        (Some(entries), cursor)
    } else {
        (None, None)
    };

    let stats = if opts.include_stats {
        let log = ctx.store.appends_for_file(file.id, None, None).await;
        Some(task_stats(&log, Utc::now()))
    } else {
        None
    };

    let (frontmatter, body) = match opts.format {
        ReadFormat::Raw => (None, None),
        ReadFormat::Parsed => {
            let (fm, body) = parse_frontmatter(&file.content);
            (fm, Some(body.to_string()))
        }
    };

    Ok(FileView {
        etag: etag_for(&file.content),
        size: file.size_bytes(),
        path: file.path,
        content: file.content,
        created_at: file.created_at,
        updated_at: file.updated_at,
        settings: file.settings,
        frontmatter,
        body,
        append_count,
        appends,
        next_cursor,
        stats,
    })
}

// ---------------------------------------------------------------------------
// Delete / recover
// ---------------------------------------------------------------------------

/// Result of a delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    /// Canonical path.
    pub path: String,
    /// Whether the row was removed permanently.
    pub permanent: bool,
    /// Whether recover can still restore the file.
    pub recoverable: bool,
    /// Recovery deadline for soft deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Size released from the storage counter.
    pub size: u64,
}

/// Delete the file at `path`; `permanent=true` removes the row outright.
pub async fn delete_file(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path: &str,
    permanent: bool,
) -> ApiResult<DeleteOutcome> {
    ensure_in_scope(auth, path)?;
    let file = live_file(ctx, auth, path).await?;
    let size = file.size_bytes();

    let outcome = if permanent {
        ctx.store
            .hard_delete_file(file.id)
            .await
            .map_err(|e| ApiError::server_error(e.to_string()))?;
        DeleteOutcome {
            path: file.path.clone(),
            permanent: true,
            recoverable: false,
            expires_at: None,
            size,
        }
    } else {
        let deleted = ctx
            .store
            .soft_delete_file(file.id)
            .await
            .map_err(|e| ApiError::server_error(e.to_string()))?;
        DeleteOutcome {
            path: file.path.clone(),
            permanent: false,
            recoverable: true,
            expires_at: deleted.recovery_deadline(),
            size,
        }
    };

    let _ = ctx.store.adjust_storage(auth.workspace_id, -(size as i64)).await;

    ctx.publish(
        auth.workspace_id,
        EventKind::FileDeleted,
        &file.path,
        Some(file.id),
        json!({ "permanent": permanent }),
    );
    let metadata = BTreeMap::from([("permanent".to_string(), json!(permanent))]);
    if permanent {
        // Permanent removal must leave a durable trail.
        ctx.audit_event_sync(
            auth,
            meta,
            AuditAction::FileDelete,
            "file",
            Some(file.id.to_string()),
            Some(file.path.clone()),
            metadata,
        )
        .await;
    } else {
        ctx.audit_event(
            auth,
            meta,
            AuditAction::FileDelete,
            "file",
            Some(file.id.to_string()),
            Some(file.path.clone()),
            metadata,
        );
    }

    Ok(outcome)
}

/// Freshly minted capability plaintexts for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MintedKeys {
    /// Read-tier plaintext.
    pub read: String,
    /// Append-tier plaintext.
    pub append: String,
    /// Write-tier plaintext.
    pub write: String,
}

/// Result of a recover.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecoverOutcome {
    /// Canonical path.
    pub path: String,
    /// ETag of the restored content.
    pub etag: String,
    /// Replacement keys when rotation was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<MintedKeys>,
}

/// Restore the soft-deleted file behind a file-scope key; optionally rotate
/// its capability URLs.
pub async fn recover_file(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    rotate: bool,
) -> ApiResult<RecoverOutcome> {
    let Some(path) = auth.file_scope_path().map(str::to_string) else {
        return Err(ApiError::invalid_request(
            "recover requires a file-scoped key",
        ));
    };

    let Some(deleted) = ctx.store.deleted_file_by_path(auth.workspace_id, &path).await else {
        return Err(ApiError::not_found());
    };
    let within_window = deleted
        .recovery_deadline()
        .map(|deadline| deadline > Utc::now())
        .unwrap_or(false);
    if !within_window {
        // Past the window the file is as good as gone.
        return Err(ApiError::not_found());
    }

    let restored = match ctx.store.restore_file(deleted.id).await {
        Ok(file) => file,
        Err(StoreError::PathTaken { .. }) => {
            return Err(ApiError::new(
                ErrorCode::FileAlreadyExists,
                "a newer file occupies this path",
            ));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    };
    let _ = ctx
        .store
        .adjust_storage(auth.workspace_id, restored.size_bytes() as i64)
        .await;

    let keys = if rotate {
        Some(rotate_keys_inner(ctx, auth, &path).await)
    } else {
        None
    };

    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileRecover,
        "file",
        Some(restored.id.to_string()),
        Some(restored.path.clone()),
        BTreeMap::from([("rotated".to_string(), json!(rotate))]),
    );

    Ok(RecoverOutcome {
        etag: etag_for(&restored.content),
        path: restored.path,
        keys,
    })
}

// ---------------------------------------------------------------------------
// Move / rename / rotate / share
// ---------------------------------------------------------------------------

/// Result of a move or rename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    /// Previous canonical path.
    pub from: String,
    /// New canonical path.
    pub to: String,
    /// Content ETag (moves never touch content).
    pub etag: String,
}

/// Move a file.  File-scope keys move their own file; wider keys name the
/// source in the request body.
pub async fn move_file(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    from_raw: Option<&str>,
    to_raw: &str,
) -> ApiResult<MoveOutcome> {
    let from = match auth.file_scope_path() {
        Some(path) => path.to_string(),
        None => {
            let raw = from_raw
                .ok_or_else(|| ApiError::invalid_request("source path required"))?;
            let from = validate_body_path(raw)?;
            ensure_in_scope(auth, &from)?;
            from
        }
    };
    let to = validate_body_path(to_raw)?;
    if auth.scope_type != ScopeType::File {
        ensure_in_scope(auth, &to)?;
    }
    if from == to {
        return Err(ApiError::invalid_request("source and destination are equal"));
    }

    let file = live_file(ctx, auth, &from).await?;
    let moved = match ctx.store.change_file_path(file.id, &to).await {
        Ok(file) => file,
        Err(StoreError::PathTaken { .. }) => {
            return Err(ApiError::new(
                ErrorCode::FileAlreadyExists,
                "destination is occupied",
            ));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    };
    ctx.store
        .retarget_file_keys(auth.workspace_id, &from, &to)
        .await;

    ctx.publish(
        auth.workspace_id,
        EventKind::FileUpdated,
        &moved.path,
        Some(moved.id),
        json!({ "movedFrom": from.clone() }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileMove,
        "file",
        Some(moved.id.to_string()),
        Some(moved.path.clone()),
        BTreeMap::from([("previousPath".to_string(), json!(from.clone()))]),
    );

    Ok(MoveOutcome {
        from,
        etag: etag_for(&moved.content),
        to: moved.path,
    })
}

/// Rename the file portion of a file-scope key's path, preserving its parent
/// directory.
pub async fn rename_file(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    new_name: &str,
) -> ApiResult<MoveOutcome> {
    let Some(from) = auth.file_scope_path().map(str::to_string) else {
        return Err(ApiError::invalid_request("rename requires a file-scoped key"));
    };
    if new_name.is_empty() || new_name.contains('/') {
        return Err(ApiError::invalid_request("invalid file name"));
    }
    let to = validate_body_path(&mb_path::join(mb_path::parent_of(&from), new_name))?;
    if from == to {
        return Err(ApiError::invalid_request("name is unchanged"));
    }

    let file = live_file(ctx, auth, &from).await?;
    let moved = match ctx.store.change_file_path(file.id, &to).await {
        Ok(file) => file,
        Err(StoreError::PathTaken { .. }) => {
            return Err(ApiError::new(
                ErrorCode::FileAlreadyExists,
                "a file with that name exists",
            ));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    };
    ctx.store
        .retarget_file_keys(auth.workspace_id, &from, &to)
        .await;

    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileRename,
        "file",
        Some(moved.id.to_string()),
        Some(moved.path.clone()),
        BTreeMap::from([("previousPath".to_string(), json!(from.clone()))]),
    );

    Ok(MoveOutcome {
        from,
        etag: etag_for(&moved.content),
        to: moved.path,
    })
}

async fn rotate_keys_inner(
    ctx: &EngineContext,
    auth: &Authorization,
    path: &str,
) -> MintedKeys {
    for key in ctx.store.keys_for_file_scope(auth.workspace_id, path).await {
        let _ = ctx.store.revoke_key(key.id).await;
    }
    let (_, read) = mint_capability(
        &ctx.store,
        auth.workspace_id,
        Permission::Read,
        ScopeType::File,
        Some(path.to_string()),
    )
    .await;
    let (_, append) = mint_capability(
        &ctx.store,
        auth.workspace_id,
        Permission::Append,
        ScopeType::File,
        Some(path.to_string()),
    )
    .await;
    let (_, write) = mint_capability(
        &ctx.store,
        auth.workspace_id,
        Permission::Write,
        ScopeType::File,
        Some(path.to_string()),
    )
    .await;
    MintedKeys {
        read,
        append,
        write,
    }
}

/// Revoke every key scoped to the resolved file and mint a fresh triple.
pub async fn rotate_file_keys(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
) -> ApiResult<MintedKeys> {
    let Some(path) = auth.file_scope_path().map(str::to_string) else {
        return Err(ApiError::invalid_request("rotate requires a file-scoped key"));
    };
    let keys = rotate_keys_inner(ctx, auth, &path).await;
    // Rotation invalidates live URLs; the trail must survive a crash.
    ctx.audit_event_sync(
        auth,
        meta,
        AuditAction::KeysRotate,
        "key",
        None,
        Some(path),
        BTreeMap::new(),
    )
    .await;
    Ok(keys)
}

/// A minted share link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareOutcome {
    /// The plaintext key (returned exactly once).
    pub key: String,
    /// Granted permission.
    pub permission: Permission,
    /// Scope type of the minted key.
    pub scope_type: ScopeType,
    /// Scope path.
    pub scope_path: String,
}

/// Mint a scoped capability for a sub-path.  A trailing slash requests a
/// folder scope; the granted permission may not exceed the issuer's.
pub async fn share_scope(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path_raw: &str,
    permission: Permission,
) -> ApiResult<ShareOutcome> {
    if !auth.permission.satisfies(permission) {
        return Err(ApiError::invalid_request(
            "cannot grant a permission above the issuing key",
        ));
    }
    let folder = path_raw.ends_with('/') && path_raw != "/";
    let path = validate_body_path(path_raw)?;
    ensure_in_scope(auth, &path)?;

    let scope_type = if folder { ScopeType::Folder } else { ScopeType::File };
    let (record, plaintext) = mint_capability(
        &ctx.store,
        auth.workspace_id,
        permission,
        scope_type,
        Some(path.clone()),
    )
    .await;

    ctx.audit_event_sync(
        auth,
        meta,
        AuditAction::KeysShare,
        "key",
        Some(record.id.to_string()),
        Some(path.clone()),
        BTreeMap::from([("permission".to_string(), json!(permission.as_str()))]),
    )
    .await;

    Ok(ShareOutcome {
        key: plaintext,
        permission,
        scope_type,
        scope_path: path,
    })
}

// ---------------------------------------------------------------------------
// Settings / copy / bulk
// ---------------------------------------------------------------------------

/// Replace the settings object on a file.
pub async fn update_settings(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path: &str,
    settings: Settings,
) -> ApiResult<FileView> {
    ensure_in_scope(auth, path)?;
    let mut file = live_file(ctx, auth, path).await?;
    file.settings = Some(settings);
    file.updated_at = Utc::now();
    ctx.store
        .update_file(file.clone())
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.publish(
        auth.workspace_id,
        EventKind::FileUpdated,
        &file.path,
        Some(file.id),
        json!({ "settings": true }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileSettings,
        "file",
        Some(file.id.to_string()),
        Some(file.path.clone()),
        BTreeMap::new(),
    );

    read_file(ctx, auth, path, ReadOptions::default()).await
}

/// Copy a file to a new path within the key's scope.
pub async fn copy_file(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    from_raw: &str,
    to_raw: &str,
) -> ApiResult<UpsertOutcome> {
    let from = validate_body_path(from_raw)?;
    let to = validate_body_path(to_raw)?;
    ensure_in_scope(auth, &from)?;
    ensure_in_scope(auth, &to)?;

    let source = match ctx.store.file_by_path(auth.workspace_id, &from).await {
        Ok(file) => file,
        Err(StoreError::FileNotFound) => {
            return Err(ApiError::new(ErrorCode::SourceNotFound, "source not found")
                .with_detail("path", from));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    };

    let workspace = ctx
        .store
        .workspace(auth.workspace_id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::WorkspaceNotFound, "workspace not found"))?;
    size_check(ctx, &source.content)?;
    quota_check(ctx, workspace.storage_used_bytes, source.size_bytes(), 0)?;

    let now = Utc::now();
    let copy = FileRecord {
        id: Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        path: to.clone(),
        content: source.content.clone(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        settings: source.settings.clone(),
    };
    match ctx.store.insert_file(copy.clone()).await {
        Ok(()) => {}
        Err(StoreError::PathTaken { .. }) => {
            return Err(ApiError::new(
                ErrorCode::FileAlreadyExists,
                "destination is occupied",
            ));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    }
    let _ = ctx
        .store
        .adjust_storage(auth.workspace_id, copy.size_bytes() as i64)
        .await;

    let etag = etag_for(&copy.content);
    ctx.publish(
        auth.workspace_id,
        EventKind::FileCreated,
        &copy.path,
        Some(copy.id),
        json!({ "copiedFrom": from.clone() }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FileCreate,
        "file",
        Some(copy.id.to_string()),
        Some(copy.path.clone()),
        BTreeMap::from([("copiedFrom".to_string(), json!(from))]),
    );

    let size = copy.size_bytes();
    Ok(UpsertOutcome {
        created: true,
        path: copy.path,
        size,
        etag,
        appends_stale: 0,
    })
}

/// One item of a bulk create.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    /// Raw target path.
    pub path: String,
    /// Content.
    pub content: String,
}

/// Per-item outcome of a bulk create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    /// Raw path as submitted.
    pub path: String,
    /// Whether this item was created.
    pub ok: bool,
    /// Error code for failed items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ETag for created items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Create many files; failures are reported per item, not atomically.
pub async fn bulk_create(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    items: Vec<BulkRequest>,
) -> ApiResult<Vec<BulkItemResult>> {
    if items.is_empty() {
        return Err(ApiError::invalid_request("no items supplied"));
    }
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let raw = item.path.clone();
        let outcome = async {
            let path = validate_body_path(&item.path)?;
            upsert(
                ctx,
                auth,
                meta,
                UpsertRequest {
                    path,
                    content: item.content,
                    if_match: None,
                    settings: None,
                },
            )
            .await
        }
        .await;
        results.push(match outcome {
            Ok(done) => BulkItemResult {
                path: raw,
                ok: true,
                error: None,
                etag: Some(done.etag),
            },
            Err(err) => BulkItemResult {
                path: raw,
                ok: false,
                error: Some(err.code.as_str().to_string()),
                etag: None,
            },
        });
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

/// Create an explicit folder record.
pub async fn create_folder(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path_raw: &str,
    settings: Option<Settings>,
) -> ApiResult<FolderRecord> {
    let path = validate_body_path(path_raw)?;
    ensure_in_scope(auth, &path)?;

    let folder = FolderRecord {
        id: Uuid::new_v4(),
        workspace_id: auth.workspace_id,
        path: path.clone(),
        settings,
        created_at: Utc::now(),
    };
    match ctx.store.insert_folder(folder.clone()).await {
        Ok(()) => {}
        Err(StoreError::FolderTaken { .. }) => {
            return Err(ApiError::new(
                ErrorCode::FolderAlreadyExists,
                "folder already exists",
            ));
        }
        Err(other) => return Err(ApiError::server_error(other.to_string())),
    }

    ctx.publish(
        auth.workspace_id,
        EventKind::FolderCreated,
        &folder.path,
        Some(folder.id),
        json!({}),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FolderCreate,
        "folder",
        Some(folder.id.to_string()),
        Some(folder.path.clone()),
        BTreeMap::new(),
    );
    Ok(folder)
}

/// Delete a folder.  Refuses non-empty folders unless `recursive`; recursive
/// deletion soft-deletes every file underneath.
pub async fn delete_folder(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    path_raw: &str,
    recursive: bool,
) -> ApiResult<usize> {
    let path = validate_body_path(path_raw)?;
    ensure_in_scope(auth, &path)?;

    let files = ctx.store.list_files(auth.workspace_id, &path).await;
    let explicit = ctx.store.folder_by_path(auth.workspace_id, &path).await.ok();
    if files.is_empty() && explicit.is_none() {
        return Err(ApiError::new(ErrorCode::FolderNotFound, "folder not found"));
    }
    if !files.is_empty() && !recursive {
        return Err(ApiError::new(
            ErrorCode::FolderNotEmpty,
            "folder still contains files",
        )
        .with_detail("fileCount", files.len()));
    }

    let mut deleted = 0;
    for file in files {
        if ctx.store.soft_delete_file(file.id).await.is_ok() {
            let _ = ctx
                .store
                .adjust_storage(auth.workspace_id, -(file.size_bytes() as i64))
                .await;
            deleted += 1;
        }
    }
    if explicit.is_some() {
        let _ = ctx.store.delete_folder(auth.workspace_id, &path).await;
    }

    ctx.publish(
        auth.workspace_id,
        EventKind::FolderDeleted,
        &path,
        None,
        json!({ "deletedFiles": deleted }),
    );
    ctx.audit_event(
        auth,
        meta,
        AuditAction::FolderDelete,
        "folder",
        None,
        Some(path),
        BTreeMap::from([("deletedFiles".to_string(), json!(deleted))]),
    );
    Ok(deleted)
}

/// Sort key for folder listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// By path name.
    #[default]
    Name,
    /// By `updated_at`.
    Modified,
    /// By content size.
    Size,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Folder listing parameters.
#[derive(Debug, Clone, Default)]
pub struct FolderListQuery {
    /// Include the whole subtree rather than direct children.
    pub recursive: bool,
    /// Sort key.
    pub sort: SortKey,
    /// Sort direction.
    pub order: SortOrder,
    /// Page size.
    pub limit: Option<usize>,
    /// Offset cursor.
    pub cursor: Option<String>,
    /// Attach per-file append counts (the append surface does).
    pub with_append_counts: bool,
}

/// What a listing entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A file row.
    File,
    /// A folder (virtual or explicit).
    Folder,
}

/// One row of a folder listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    /// Entry name (final path segment).
    pub name: String,
    /// Canonical path.
    pub path: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Content size (files).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Strong ETag (files).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Last mutation time (files).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Append count (files on the append surface).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_count: Option<usize>,
}

/// A folder listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    /// The folder path (folder form, trailing slash).
    pub path: String,
    /// Page of entries.
    pub entries: Vec<ListEntry>,
    /// Entries across all pages.
    pub total: usize,
    /// Cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// List a folder.
pub async fn list_folder(
    ctx: &EngineContext,
    auth: &Authorization,
    path_raw: &str,
    query: FolderListQuery,
) -> ApiResult<FolderListing> {
    let folder = mb_path::normalize(path_raw);
    ensure_in_scope(auth, &folder)?;

    let files = ctx.store.list_files(auth.workspace_id, &folder).await;
    let explicit = ctx.store.list_folders(auth.workspace_id, &folder).await;

    let mut entries: Vec<ListEntry> = Vec::new();
    let mut seen_folders: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for record in &explicit {
        if record.path == folder {
            continue;
        }
        if !query.recursive && mb_path::parent_of(&record.path) != folder {
            continue;
        }
        if seen_folders.insert(record.path.clone()) {
            entries.push(ListEntry {
                name: mb_path::file_name_of(&record.path).to_string(),
                path: record.path.clone(),
                kind: EntryKind::Folder,
                size: None,
                etag: None,
                updated_at: None,
                append_count: None,
            });
        }
    }

    for file in &files {
        if query.recursive {
            entries.push(file_entry(ctx, file, query.with_append_counts).await);
            continue;
        }
        let parent = mb_path::parent_of(&file.path);
        if parent == folder {
            entries.push(file_entry(ctx, file, query.with_append_counts).await);
        } else {
            // A deeper file implies a direct child folder.
            let base = if folder == "/" { "" } else { folder.as_str() };
            let remainder = file.path.strip_prefix(&format!("{base}/"));
            if let Some(rest) = remainder
                && let Some(first) = rest.split('/').next()
            {
                let child = mb_path::join(&folder, first);
                if seen_folders.insert(child.clone()) {
                    entries.push(ListEntry {
                        name: first.to_string(),
                        path: child,
                        kind: EntryKind::Folder,
                        size: None,
                        etag: None,
                        updated_at: None,
                        append_count: None,
                    });
                }
            }
        }
    }

    sort_entries(&mut entries, query.sort, query.order);

    let total = entries.len();
    let offset = match query.cursor.as_deref() {
        Some(cursor) => decode_offset(cursor)
            .ok_or_else(|| ApiError::invalid_request("malformed cursor"))?,
        None => 0,
    };
    let limit = query.limit.unwrap_or(usize::MAX);
    let page: Vec<ListEntry> = entries.into_iter().skip(offset).take(limit).collect();
    let next_offset = offset + page.len();
    let next_cursor = (next_offset < total).then(|| encode_offset(next_offset));

    Ok(FolderListing {
        path: mb_path::normalize_folder(&folder),
        entries: page,
        total,
        next_cursor,
    })
}

async fn file_entry(ctx: &EngineContext, file: &FileRecord, with_counts: bool) -> ListEntry {
    let append_count = if with_counts {
        Some(ctx.store.count_appends(file.id).await)
    } else {
        None
    };
    ListEntry {
        name: mb_path::file_name_of(&file.path).to_string(),
        path: file.path.clone(),
        kind: EntryKind::File,
        size: Some(file.size_bytes()),
        etag: Some(etag_for(&file.content)),
        updated_at: Some(file.updated_at),
        append_count,
    }
}

fn sort_entries(entries: &mut [ListEntry], sort: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        // Folders group before files under every sort key.
        let group = folder_rank(a).cmp(&folder_rank(b));
        if group != std::cmp::Ordering::Equal {
            return group;
        }
        let key = match sort {
            SortKey::Name => a.path.cmp(&b.path),
            SortKey::Modified => a.updated_at.cmp(&b.updated_at),
            SortKey::Size => a.size.cmp(&b.size),
        };
        match order {
            SortOrder::Asc => key,
            SortOrder::Desc => key.reverse(),
        }
    });
}

fn folder_rank(entry: &ListEntry) -> u8 {
    match entry.kind {
        EntryKind::Folder => 0,
        EntryKind::File => 1,
    }
}
