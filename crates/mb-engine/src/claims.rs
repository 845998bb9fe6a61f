// SPDX-License-Identifier: MIT OR Apache-2.0
//! Claim lifecycle operators: renew, complete, cancel, block.
//!
//! Each operator locates the claim by public append id within the owning
//! workspace, then appends a log entry that semantically updates the task;
//! the projector derives the new state from the log.  Renew additionally
//! denormalizes the fresh `expires_at` onto the original claim row.

use crate::appends::{DEFAULT_CLAIM_LEASE_SECS, preview_of};
use crate::context::{EngineContext, RequestMeta};
use chrono::{Duration, Utc};
use mb_auth::Authorization;
use mb_core::{
    AppendEntry, AppendType, AuditAction, FileRecord, Priority, is_valid_append_id,
};
use mb_error::{ApiError, ApiResult, ErrorCode};
use mb_store::NewAppend;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Result of a claim operator: the (possibly updated) claim plus the public
/// id of the log entry the operator appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOpResult {
    /// The claim entry after the operation.
    pub claim: AppendEntry,
    /// Public id of the appended operator entry.
    pub append_id: String,
}

async fn locate_claim(
    ctx: &EngineContext,
    auth: &Authorization,
    claim_id: &str,
) -> ApiResult<(FileRecord, AppendEntry)> {
    if !is_valid_append_id(claim_id) {
        return Err(ApiError::new(ErrorCode::InvalidAppendId, "malformed claim id"));
    }
    let Some((file, entry)) = ctx
        .store
        .find_append_in_workspace(auth.workspace_id, claim_id)
        .await
    else {
        return Err(ApiError::new(ErrorCode::AppendNotFound, "claim not found"));
    };
    if entry.kind != AppendType::Claim {
        return Err(ApiError::invalid_request(format!(
            "'{claim_id}' is a {} entry, not a claim",
            entry.kind
        )));
    }
    Ok((file, entry))
}

fn operator_draft(
    kind: AppendType,
    author: &str,
    target: String,
    content: Option<&str>,
) -> NewAppend {
    NewAppend {
        author: author.to_string(),
        kind,
        status: None,
        priority: Priority::default(),
        labels: BTreeSet::new(),
        target: Some(target),
        content_preview: content.map(preview_of),
        content_hash: None,
        expires_at: None,
        due_at: None,
    }
}

/// Extend the claim's lease by `expires_in_seconds` (default 1800) from now.
///
/// A negative value deliberately forces the lease into the past, which the
/// projector reads as stalled.
pub async fn renew_claim(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    claim_id: &str,
    expires_in_seconds: Option<i64>,
) -> ApiResult<ClaimOpResult> {
    let secs = expires_in_seconds.unwrap_or(DEFAULT_CLAIM_LEASE_SECS);
    if secs.abs() > crate::appends::MAX_LEASE_SECS {
        return Err(ApiError::new(
            ErrorCode::InvalidTimeout,
            "lease length is out of range",
        ));
    }
    let (file, claim) = locate_claim(ctx, auth, claim_id).await?;
    let expires_at = Utc::now() + Duration::seconds(secs);

    let updated = ctx
        .store
        .update_append_expiry(claim.id, expires_at)
        .await
        .map_err(|_| ApiError::new(ErrorCode::AppendNotFound, "claim not found"))?;

    let entry = ctx
        .store
        .insert_append(
            file.id,
            operator_draft(AppendType::Renew, &claim.author, claim.public_id.clone(), None),
        )
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.audit_event(
        auth,
        meta,
        AuditAction::ClaimRenew,
        "append",
        Some(claim.public_id.clone()),
        Some(file.path.clone()),
        BTreeMap::from([("expiresInSeconds".to_string(), json!(secs))]),
    );

    Ok(ClaimOpResult {
        claim: updated,
        append_id: entry.public_id,
    })
}

/// Complete the claimed task by appending a `response` that references it.
pub async fn complete_claim(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    claim_id: &str,
    content: Option<&str>,
) -> ApiResult<ClaimOpResult> {
    let (file, claim) = locate_claim(ctx, auth, claim_id).await?;
    let Some(task_id) = claim.target.clone() else {
        return Err(ApiError::invalid_request("claim has no task reference"));
    };

    let entry = ctx
        .store
        .insert_append(
            file.id,
            operator_draft(AppendType::Response, &claim.author, task_id, content),
        )
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.audit_event(
        auth,
        meta,
        AuditAction::ClaimComplete,
        "append",
        Some(claim.public_id.clone()),
        Some(file.path.clone()),
        BTreeMap::new(),
    );

    Ok(ClaimOpResult {
        claim,
        append_id: entry.public_id,
    })
}

/// Cancel the claim, returning its task to the pool.
pub async fn cancel_claim(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    claim_id: &str,
    reason: Option<&str>,
) -> ApiResult<ClaimOpResult> {
    let (file, claim) = locate_claim(ctx, auth, claim_id).await?;

    let entry = ctx
        .store
        .insert_append(
            file.id,
            operator_draft(
                AppendType::Cancel,
                &claim.author,
                claim.public_id.clone(),
                reason,
            ),
        )
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.audit_event(
        auth,
        meta,
        AuditAction::ClaimCancel,
        "append",
        Some(claim.public_id.clone()),
        Some(file.path.clone()),
        BTreeMap::new(),
    );

    Ok(ClaimOpResult {
        claim,
        append_id: entry.public_id,
    })
}

/// Mark the claimed task blocked.  A reason is required.
pub async fn block_claim(
    ctx: &EngineContext,
    auth: &Authorization,
    meta: &RequestMeta,
    claim_id: &str,
    reason: &str,
) -> ApiResult<ClaimOpResult> {
    if reason.trim().is_empty() {
        return Err(ApiError::invalid_request("block requires a reason"));
    }
    let (file, claim) = locate_claim(ctx, auth, claim_id).await?;
    let Some(task_id) = claim.target.clone() else {
        return Err(ApiError::invalid_request("claim has no task reference"));
    };

    let entry = ctx
        .store
        .insert_append(
            file.id,
            operator_draft(AppendType::Blocked, &claim.author, task_id, Some(reason)),
        )
        .await
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    ctx.audit_event(
        auth,
        meta,
        AuditAction::ClaimBlock,
        "append",
        Some(claim.public_id.clone()),
        Some(file.path.clone()),
        BTreeMap::from([("reason".to_string(), json!(preview_of(reason)))]),
    );

    Ok(ClaimOpResult {
        claim,
        append_id: entry.public_id,
    })
}
