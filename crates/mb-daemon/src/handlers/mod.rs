// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request handlers, grouped by URL surface.

mod admin;
mod append;
mod orchestration;
mod read;
mod write;

pub use admin::{api_export, api_search};
pub use append::{
    bulk_create_files, copy_file, create_subscription, delete_subscription, list_claims,
    list_file_appends, list_subscriptions, list_tasks, post_append,
};
pub use orchestration::{bootstrap, claim_operator, health};
pub use read::{read_path, read_root};
pub use write::{
    claim_workspace, create_folder, delete_file, delete_file_root, delete_folder, move_file,
    patch_file_settings, put_file, put_file_root, recover_file, rename_file, rotate_keys, share,
    write_get_path, write_get_root,
};

use crate::state::AppState;
use crate::{Failure, ok_response};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use mb_auth::{Authorization, ResolveOptions, resolve_capability};
use mb_core::{OkEnvelope, Permission};
use mb_engine::{RequestMeta, StoredResponse, lookup_replay, store_response};
use mb_error::ApiError;
use mb_netguard::resolve_client_ip;
use serde::Serialize;

/// Marker header set on idempotent replays.
pub const IDEMPOTENCY_REPLAYED: &str = "idempotency-replayed";

// ---------------------------------------------------------------------------
// Raw path handling
// ---------------------------------------------------------------------------

/// The raw, undecoded remainder of the URI path after `skip` leading
/// segments (`/r/{key}/a%20b.md` with `skip = 2` → `/a%20b.md`).
///
/// Percent-decoding is deliberately left to the path validator so it happens
/// exactly once.
pub(crate) fn raw_tail(uri: &Uri, skip: usize) -> String {
    let path = uri.path();
    let mut seen = 0;
    for (pos, byte) in path.bytes().enumerate() {
        if byte == b'/' {
            seen += 1;
            if seen > skip {
                return path[pos..].to_string();
            }
        }
    }
    "/".to_string()
}

/// Screen the raw URL, then validate and normalize the tail path.
pub(crate) fn validated_tail(uri: &Uri, skip: usize) -> Result<String, Failure> {
    if mb_path::raw_url_has_traversal(uri.path()) {
        return Err(ApiError::invalid_path("path contains a traversal sequence").into());
    }
    let raw = raw_tail(uri, skip);
    mb_path::validate_and_normalize(&raw)
        .map_err(|reason| ApiError::invalid_path(reason.to_string()).into())
}

// ---------------------------------------------------------------------------
// Request metadata
// ---------------------------------------------------------------------------

/// Extract client IP, user agent, and idempotency key from the headers.
pub(crate) fn request_meta(state: &AppState, headers: &HeaderMap) -> RequestMeta {
    let lookup = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let ip = resolve_client_ip(lookup, &state.proxy_policy());
    RequestMeta {
        ip: Some(ip),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        idempotency_key: headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// The `If-Match` header, if present.
pub(crate) fn if_match_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Capability resolution
// ---------------------------------------------------------------------------

/// Resolve a path-borne capability key for a surface tier.
pub(crate) async fn resolve(
    state: &AppState,
    key: &str,
    required: Permission,
    path_hint: Option<&str>,
) -> Result<Authorization, Failure> {
    resolve_capability(
        &state.store,
        key,
        ResolveOptions {
            required_permission: Some(required),
            path_hint: path_hint.map(str::to_string),
        },
    )
    .await
    .map_err(Failure)
}

/// The operation path for a key: the URL tail when present, else the file
/// the key is scoped to.
pub(crate) fn target_path(auth: &Authorization, tail: Option<String>) -> Result<String, Failure> {
    match tail {
        Some(path) if path != "/" => Ok(path),
        _ => match auth.file_scope_path() {
            Some(path) => Ok(path.to_string()),
            None => Err(ApiError::invalid_request("a file path is required").into()),
        },
    }
}

// ---------------------------------------------------------------------------
// Idempotency plumbing
// ---------------------------------------------------------------------------

/// Re-emit a stored envelope with the replay marker.
pub(crate) fn replay_response(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut resp = (status, axum::Json(stored.body)).into_response();
    resp.headers_mut().insert(
        IDEMPOTENCY_REPLAYED,
        axum::http::HeaderValue::from_static("true"),
    );
    resp
}

/// Short-circuit a mutating handler when the idempotency token already has a
/// stored response.
pub(crate) async fn check_replay(state: &AppState, meta: &RequestMeta) -> Option<Response> {
    let token = meta.idempotency_key.as_deref()?;
    lookup_replay(&state.store, token).await.map(replay_response)
}

/// Finish a mutation: wrap in the envelope, store the idempotency record
/// when a token was supplied, snapshot the workspace, respond.
pub(crate) async fn finish_mutation<T: Serialize>(
    state: &AppState,
    auth: &Authorization,
    meta: &RequestMeta,
    status: StatusCode,
    data: T,
) -> Result<Response, Failure> {
    let envelope = serde_json::to_value(OkEnvelope::new(data))
        .map_err(|e| Failure(ApiError::server_error(e.to_string())))?;

    if let Some(token) = meta.idempotency_key.as_deref() {
        let raced =
            store_response(&state.store, auth.key_id, token, status.as_u16(), envelope.clone())
                .await;
        if let Some(winner) = raced {
            // A concurrent request with the same token won; replay its envelope.
            return Ok(replay_response(winner));
        }
    }

    state.spawn_persist(auth.workspace_id);
    Ok((status, axum::Json(envelope)).into_response())
}

/// Plain success response for reads (no idempotency, no persist).
pub(crate) fn ok_data<T: Serialize>(data: T) -> Response {
    ok_response(StatusCode::OK, data)
}
