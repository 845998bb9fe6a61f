// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /r/{key}` and `GET /r/{key}/{*path}`: file reads, folder listings,
//! and scoped stats.

use super::{ok_data, resolve, validated_tail};
use crate::state::AppState;
use crate::{Failure, HandlerResult};
use axum::extract::{Path as AxPath, Query, State};
use axum::http::{HeaderValue, Uri, header};
use mb_auth::Authorization;
use mb_core::Permission;
use mb_engine::{
    FolderListQuery, ReadFormat, ReadOptions, SortKey, SortOrder, list_folder, read_file, stats,
};
use mb_error::{ApiError, ErrorCode};
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters shared by the read surface.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    format: Option<String>,
    include: Option<String>,
    appends: Option<usize>,
    since: Option<String>,
    recursive: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

fn parse_read_options(query: &ReadQuery) -> Result<ReadOptions, Failure> {
    let format = match query.format.as_deref() {
        None | Some("raw") => ReadFormat::Raw,
        Some("parsed") => ReadFormat::Parsed,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown format '{other}'")).into());
        }
    };
    let include_stats = match query.include.as_deref() {
        None => false,
        Some("stats") => true,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown include '{other}'")).into());
        }
    };
    Ok(ReadOptions {
        format,
        include_stats,
        appends: query.appends,
        since: query.since.clone(),
    })
}

fn parse_listing_options(query: &ReadQuery, with_counts: bool) -> Result<FolderListQuery, Failure> {
    let recursive = match query.recursive.as_deref() {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown recursive '{other}'")).into());
        }
    };
    let sort = match query.sort.as_deref() {
        None | Some("name") => SortKey::Name,
        Some("modified") => SortKey::Modified,
        Some("size") => SortKey::Size,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown sort '{other}'")).into());
        }
    };
    let order = match query.order.as_deref() {
        None | Some("asc") => SortOrder::Asc,
        Some("desc") => SortOrder::Desc,
        Some(other) => {
            return Err(ApiError::invalid_request(format!("unknown order '{other}'")).into());
        }
    };
    Ok(FolderListQuery {
        recursive,
        sort,
        order,
        limit: query.limit,
        cursor: query.cursor.clone(),
        with_append_counts: with_counts,
    })
}

/// Serve a file read with the strong ETag response header.
pub(crate) async fn serve_file(
    state: &AppState,
    auth: &Authorization,
    path: &str,
    query: &ReadQuery,
) -> HandlerResult {
    let opts = parse_read_options(query)?;
    let view = read_file(&state.engine, auth, path, opts).await?;
    let etag = view.etag.clone();
    let mut resp = ok_data(view);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        resp.headers_mut().insert(header::ETAG, value);
    }
    Ok(resp)
}

/// Serve a folder listing, optionally with scoped stats attached.
pub(crate) async fn serve_listing(
    state: &AppState,
    auth: &Authorization,
    folder: &str,
    query: &ReadQuery,
    with_counts: bool,
) -> HandlerResult {
    let opts = parse_listing_options(query, with_counts)?;
    let listing = list_folder(&state.engine, auth, folder, opts).await?;
    if query.include.as_deref() == Some("stats") {
        let scoped = stats(&state.engine, auth.workspace_id, folder).await?;
        let mut data = serde_json::to_value(&listing)
            .map_err(|e| Failure(ApiError::server_error(e.to_string())))?;
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "stats".into(),
                serde_json::to_value(&scoped)
                    .map_err(|e| Failure(ApiError::server_error(e.to_string())))?,
            );
        }
        return Ok(ok_data(data));
    }
    Ok(ok_data(listing))
}

/// Dispatch a read of `path`: file when one exists, folder listing when the
/// path is a folder, 410/404 otherwise.
pub(crate) async fn serve_read(
    state: &AppState,
    auth: &Authorization,
    path: &str,
    query: &ReadQuery,
    with_counts: bool,
) -> HandlerResult {
    if path == "/" {
        return serve_listing(state, auth, "/", query, with_counts).await;
    }
    match serve_file(state, auth, path, query).await {
        Ok(resp) => Ok(resp),
        Err(Failure(err)) if err.code == ErrorCode::FileNotFound => {
            let has_children = !state.store.list_files(auth.workspace_id, path).await.is_empty()
                || state.store.folder_by_path(auth.workspace_id, path).await.is_ok();
            if has_children {
                serve_listing(state, auth, path, query, with_counts).await
            } else {
                Err(Failure(err))
            }
        }
        Err(other) => Err(other),
    }
}

/// `GET /r/{key}` — the key's scope root.
pub async fn read_root(
    State(state): State<Arc<AppState>>,
    AxPath(key): AxPath<String>,
    Query(query): Query<ReadQuery>,
) -> HandlerResult {
    let auth = resolve(&state, &key, Permission::Read, None).await?;
    match auth.file_scope_path().map(str::to_string) {
        Some(path) => serve_file(&state, &auth, &path, &query).await,
        None => {
            let prefix = auth.effective_prefix().to_string();
            serve_listing(&state, &auth, &prefix, &query, false).await
        }
    }
}

/// `GET /r/{key}/{*path}` — read a file or list a folder.
pub async fn read_path(
    State(state): State<Arc<AppState>>,
    AxPath((key, _path)): AxPath<(String, String)>,
    Query(query): Query<ReadQuery>,
    uri: Uri,
) -> HandlerResult {
    let path = validated_tail(&uri, 2)?;
    let auth = resolve(&state, &key, Permission::Read, Some(&path)).await?;
    serve_read(&state, &auth, &path, &query, false).await
}
