// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/api/v1` surface: workspace-wide search and export behind
//! `Authorization: Bearer sk_…`.

use super::{ok_data, request_meta};
use crate::HandlerResult;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::write::GzEncoder;
use mb_core::{ApiScope, AppendType, AuditAction, AuditEntry};
use mb_engine::SearchQuery;
use mb_error::{ApiError, ErrorCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::sync::Arc;
use uuid::Uuid;

fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "bearer token required"))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSearchQuery {
    q: Option<String>,
    folder: Option<String>,
    file: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    author: Option<String>,
    limit: Option<usize>,
}

/// `GET /api/v1/search`.
pub async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApiSearchQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let bearer = bearer_token(&headers)?;
    let grant = mb_auth::resolve_api_key(&state.store, &bearer, ApiScope::Search).await?;

    let kind = match query.kind.as_deref() {
        Some(tag) => Some(
            AppendType::parse(tag)
                .ok_or_else(|| ApiError::invalid_request(format!("unknown type '{tag}'")))?,
        ),
        None => None,
    };
    let folder = match query.folder.as_deref() {
        Some(raw) => Some(
            mb_path::validate_and_normalize(raw)
                .map_err(|reason| ApiError::invalid_path(reason.to_string()))?,
        ),
        None => None,
    };
    let file = match query.file.as_deref() {
        Some(raw) => Some(
            mb_path::validate_and_normalize(raw)
                .map_err(|reason| ApiError::invalid_path(reason.to_string()))?,
        ),
        None => None,
    };

    let result = mb_engine::search(
        &state.engine,
        grant.workspace_id,
        SearchQuery {
            query: query.q.clone().unwrap_or_default(),
            folder,
            file,
            kind,
            status: query.status.clone(),
            author: query.author.clone(),
            limit: query.limit.unwrap_or(50),
        },
    )
    .await?;
    Ok(ok_data(result))
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
}

/// `GET /api/v1/export?format=zip|gzip`.
pub async fn api_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
    headers: HeaderMap,
) -> HandlerResult {
    let bearer = bearer_token(&headers)?;
    let grant = mb_auth::resolve_api_key(&state.store, &bearer, ApiScope::Export).await?;
    let meta = request_meta(&state, &headers);

    let workspace = state
        .store
        .workspace(grant.workspace_id)
        .await
        .map_err(|_| ApiError::new(ErrorCode::WorkspaceNotFound, "workspace not found"))?;
    let files = state.store.list_files(workspace.id, "/").await;

    let (bytes, content_type, extension) = match query.format.as_deref() {
        None | Some("zip") => {
            let entries: Vec<(String, Vec<u8>)> = files
                .iter()
                .map(|f| {
                    let name = f.path.trim_start_matches('/').to_string();
                    (name, f.content.clone().into_bytes())
                })
                .collect();
            (build_zip(&entries), "application/zip", "zip")
        }
        Some("gzip") => {
            let bundle = json!({
                "workspace": { "id": workspace.id, "name": workspace.name.clone() },
                "files": files
                    .iter()
                    .map(|f| json!({
                        "path": f.path.clone(),
                        "content": f.content.clone(),
                        "createdAt": f.created_at,
                        "updatedAt": f.updated_at,
                    }))
                    .collect::<Vec<_>>(),
            });
            let serialized = serde_json::to_vec(&bundle)
                .map_err(|e| ApiError::server_error(e.to_string()))?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&serialized)
                .map_err(|e| ApiError::server_error(e.to_string()))?;
            let compressed = encoder
                .finish()
                .map_err(|e| ApiError::server_error(e.to_string()))?;
            (compressed, "application/gzip", "json.gz")
        }
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown format '{other}'")).into());
        }
    };

    let checksum = {
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        out
    };

    state
        .audit
        .log_sync(AuditEntry {
            id: Uuid::new_v4(),
            workspace_id: workspace.id,
            action: AuditAction::Export,
            resource_type: "workspace".into(),
            resource_id: Some(workspace.id.to_string()),
            resource_path: None,
            actor: format!("sk:{}", grant.key_id),
            actor_type: "api_key".into(),
            metadata: std::collections::BTreeMap::from([(
                "files".to_string(),
                json!(files.len()),
            )]),
            ip: meta.ip,
            user_agent: meta.user_agent,
            created_at: chrono::Utc::now(),
        })
        .await;

    let filename = format!("{}.{extension}", workspace.name.replace('/', "-"));
    let mut response: Response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) =
        header::HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&checksum) {
        headers.insert("x-export-checksum", value);
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Minimal stored-entry ZIP writer
// ---------------------------------------------------------------------------

/// Build a ZIP archive with STORED (uncompressed) entries.
///
/// Local file headers, central directory, and the end-of-central-directory
/// record per APPNOTE; CRC-32 over each entry body.
fn build_zip(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    let mut central: Vec<u8> = Vec::new();
    let mut offsets: Vec<u32> = Vec::new();

    for (name, data) in entries {
        let crc = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(data);
            hasher.finalize()
        };
        let name_bytes = name.as_bytes();
        offsets.push(out.len() as u32);

        // Local file header.
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(data);

        // Central directory entry.
        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra
        central.extend_from_slice(&0u16.to_le_bytes()); // comment
        central.extend_from_slice(&0u16.to_le_bytes()); // disk start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&offsets.last().copied().unwrap_or(0).to_le_bytes());
        central.extend_from_slice(name_bytes);
    }

    let central_offset = out.len() as u32;
    out.extend_from_slice(&central);
    let central_size = out.len() as u32 - central_offset;

    // End of central directory.
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // this disk
    out.extend_from_slice(&0u16.to_le_bytes()); // cd disk
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&central_size.to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len

    out
}
