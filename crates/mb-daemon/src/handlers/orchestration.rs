// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace bootstrap, health, and the owner-session claim operators.

use super::{ok_data, request_meta};
use crate::HandlerResult;
use crate::state::AppState;
use axum::extract::{Path as AxPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use mb_auth::{Authorization, mint_capability};
use mb_core::{AuditAction, AuditEntry, Permission, ScopeType};
use mb_engine::{block_claim, cancel_claim, complete_claim, renew_claim};
use mb_error::{ApiError, ErrorCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.metrics.summary();
    axum::Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "time": chrono::Utc::now().to_rfc3339(),
        "requests": metrics,
    }))
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapBody {
    #[serde(alias = "name")]
    workspace_name: String,
}

/// `POST /bootstrap` — create a workspace and mint its root key triple.
///
/// The plaintext keys appear in this response exactly once.
pub async fn bootstrap(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BootstrapBody>,
) -> HandlerResult {
    let name = body.workspace_name.trim();
    if name.is_empty() || name.len() > 120 {
        return Err(ApiError::invalid_request("workspaceName is required").into());
    }

    let meta = request_meta(&state, &headers);
    let workspace = state.store.create_workspace(name).await;

    let (_, read) = mint_capability(
        &state.store,
        workspace.id,
        Permission::Read,
        ScopeType::Workspace,
        None,
    )
    .await;
    let (_, append) = mint_capability(
        &state.store,
        workspace.id,
        Permission::Append,
        ScopeType::Workspace,
        None,
    )
    .await;
    let (_, write) = mint_capability(
        &state.store,
        workspace.id,
        Permission::Write,
        ScopeType::Workspace,
        None,
    )
    .await;

    state
        .audit
        .log_sync(AuditEntry {
            id: Uuid::new_v4(),
            workspace_id: workspace.id,
            action: AuditAction::WorkspaceBootstrap,
            resource_type: "workspace".into(),
            resource_id: Some(workspace.id.to_string()),
            resource_path: None,
            actor: "bootstrap".into(),
            actor_type: "system".into(),
            metadata: Default::default(),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: chrono::Utc::now(),
        })
        .await;
    state.spawn_persist(workspace.id);

    let base = state.base_url();
    Ok((
        StatusCode::CREATED,
        axum::Json(mb_core::OkEnvelope::new(json!({
            "workspaceId": workspace.id,
            "name": workspace.name,
            "keys": { "read": read, "append": append, "w": write },
            "urls": {
                "read": format!("{base}/r/{read}"),
                "append": format!("{base}/a/{append}"),
                "write": format!("{base}/w/{write}"),
            },
            "appUrl": state.config.app_url,
        }))),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Claim operators
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOpBody {
    #[serde(default)]
    expires_in_seconds: Option<i64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// `POST /workspaces/{id}/orchestration/claims/{claim_id}/{op}`.
///
/// Owner-session authentication happens upstream of the core; the handler
/// validates the workspace and operates with owner authority.
pub async fn claim_operator(
    State(state): State<Arc<AppState>>,
    AxPath((workspace_id, claim_id, op)): AxPath<(Uuid, String, String)>,
    headers: HeaderMap,
    body: Option<axum::Json<ClaimOpBody>>,
) -> HandlerResult {
    let meta = request_meta(&state, &headers);
    let body = body.map(|b| b.0).unwrap_or_default();

    let workspace = state
        .store
        .workspace(workspace_id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::WorkspaceNotFound, "workspace not found"))?;

    let auth = Authorization {
        key_id: Uuid::nil(),
        workspace_id: workspace.id,
        permission: Permission::Write,
        scope_type: ScopeType::Workspace,
        scope_path: None,
        prefix: "owner".into(),
    };

    let result = match op.as_str() {
        "renew" => {
            renew_claim(
                &state.engine,
                &auth,
                &meta,
                &claim_id,
                body.expires_in_seconds,
            )
            .await?
        }
        "complete" => {
            complete_claim(&state.engine, &auth, &meta, &claim_id, body.content.as_deref())
                .await?
        }
        "cancel" => {
            cancel_claim(&state.engine, &auth, &meta, &claim_id, body.reason.as_deref()).await?
        }
        "block" => {
            let reason = body
                .reason
                .as_deref()
                .ok_or_else(|| ApiError::invalid_request("block requires a reason"))?;
            block_claim(&state.engine, &auth, &meta, &claim_id, reason).await?
        }
        _ => return Err(ApiError::not_found().into()),
    };

    state.spawn_persist(workspace.id);
    Ok(ok_data(result))
}
