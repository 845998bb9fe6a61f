// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full-text search over file content and append previews, plus the scoped
//! statistics projection.
//!
//! The scope is bounded *before* the query fans out: more than 1000 files
//! answers `QUERY_TOO_BROAD`.  Ranking runs under a 30-second bound with
//! truncation reported explicitly rather than silently.

use crate::context::EngineContext;
use crate::orchestrate::{TaskStats, task_stats};
use chrono::{DateTime, Utc};
use mb_core::AppendType;
use mb_error::{ApiError, ApiResult, ErrorCode};
use mb_store::{DocSource, SearchDoc, rank_bm25};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Files a single query may fan out over.
pub const MAX_SCOPE_FILES: usize = 1000;

/// Maximum query length in bytes.
pub const MAX_QUERY_LEN: usize = 512;

/// Wall-clock bound on ranking.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

const SNIPPET_LEN: usize = 160;

/// A search request.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Query text.
    pub query: String,
    /// Folder prefix scope (`None` means the whole authorization scope).
    pub folder: Option<String>,
    /// Exact file scope.
    pub file: Option<String>,
    /// Restrict append hits to this entry type.
    pub kind: Option<AppendType>,
    /// Restrict append hits to this status tag.
    pub status: Option<String>,
    /// Restrict append hits to this author.
    pub author: Option<String>,
    /// Maximum hits.
    pub limit: usize,
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    /// Owning file path.
    pub path: String,
    /// BM25 score.
    pub score: f64,
    /// `content` or `append`.
    pub source: String,
    /// Public append id for append hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_id: Option<String>,
    /// Author for append hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Leading text of the matched document.
    pub snippet: String,
}

/// A ranked result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Ranked hits, best first.
    pub hits: Vec<SearchResultItem>,
    /// Matches before the limit was applied.
    pub total: usize,
    /// Whether the result set was cut short (limit or time bound).
    pub truncated: bool,
}

/// Run a scoped, filtered, BM25-ranked search.
pub async fn search(
    ctx: &EngineContext,
    workspace_id: Uuid,
    req: SearchQuery,
) -> ApiResult<SearchResult> {
    if req.query.len() > MAX_QUERY_LEN {
        return Err(ApiError::new(ErrorCode::QueryTooLong, "query is too long")
            .with_detail("limit", MAX_QUERY_LEN));
    }
    if req.query.trim().is_empty() {
        return Err(ApiError::invalid_request("query is required"));
    }

    let prefix = req.folder.as_deref().unwrap_or("/");
    let scope_files = ctx.store.list_files(workspace_id, prefix).await;
    let scoped = match req.file.as_deref() {
        Some(path) => scope_files.iter().filter(|f| f.path == path).count(),
        None => scope_files.len(),
    };
    if scoped > MAX_SCOPE_FILES {
        return Err(ApiError::new(
            ErrorCode::QueryTooBroad,
            "scope exceeds the file fan-out limit",
        )
        .with_detail("files", scoped)
        .with_detail("limit", MAX_SCOPE_FILES));
    }

    let docs = ctx
        .store
        .collect_search_docs(workspace_id, prefix, req.file.as_deref())
        .await;
    let docs: Vec<SearchDoc> = docs
        .into_iter()
        .filter(|doc| doc_passes_filters(doc, &req))
        .collect();

    let limit = if req.limit == 0 { 50 } else { req.limit };
    let query = req.query.clone();
    let ranking_docs = docs.clone();
    let ranked = tokio::time::timeout(SEARCH_TIMEOUT, async move {
        rank_bm25(&ranking_docs, &query, usize::MAX)
    })
    .await;

    let (hits, timed_out) = match ranked {
        Ok(hits) => (hits, false),
        Err(_) => (Vec::new(), true),
    };

    let total = hits.len();
    let limited = total > limit;
    let items: Vec<SearchResultItem> = hits
        .into_iter()
        .take(limit)
        .map(|hit| {
            let doc = &docs[hit.doc];
            let (source, append_id, author) = match &doc.source {
                DocSource::FileContent => ("content".to_string(), None, None),
                DocSource::Append {
                    public_id, author, ..
                } => (
                    "append".to_string(),
                    Some(public_id.clone()),
                    Some(author.clone()),
                ),
            };
            SearchResultItem {
                path: doc.path.clone(),
                score: hit.score,
                source,
                append_id,
                author,
                snippet: doc.text.chars().take(SNIPPET_LEN).collect(),
            }
        })
        .collect();

    Ok(SearchResult {
        total,
        hits: items,
        truncated: limited || timed_out,
    })
}

fn doc_passes_filters(doc: &SearchDoc, req: &SearchQuery) -> bool {
    let filtering_appends = req.kind.is_some() || req.status.is_some() || req.author.is_some();
    match &doc.source {
        DocSource::FileContent => !filtering_appends,
        DocSource::Append {
            author,
            kind,
            status,
            ..
        } => {
            if let Some(want) = req.kind
                && *kind != want
            {
                return false;
            }
            if let Some(want) = req.status.as_deref()
                && status.as_deref() != Some(want)
            {
                return false;
            }
            if let Some(want) = req.author.as_deref()
                && author != want
            {
                return false;
            }
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Scoped statistics projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    /// Live files in scope.
    pub file_count: usize,
    /// Distinct folders in scope (virtual and explicit).
    pub folder_count: usize,
    /// Total content bytes.
    pub total_size: u64,
    /// Most recent mutation in scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Aggregate task statistics.
    pub task_stats: TaskStats,
}

/// Reduce a folder scope to `{fileCount, folderCount, totalSize, updatedAt,
/// taskStats}`.
pub async fn stats(ctx: &EngineContext, workspace_id: Uuid, prefix: &str) -> ApiResult<StatsView> {
    let now = Utc::now();
    let files = ctx.store.list_files(workspace_id, prefix).await;

    let mut folders: BTreeSet<String> = BTreeSet::new();
    for file in &files {
        let mut parent = mb_path::parent_of(&file.path).to_string();
        while parent != "/" && mb_path::scope_contains(prefix, &parent) {
            folders.insert(parent.clone());
            parent = mb_path::parent_of(&parent).to_string();
        }
    }
    for record in ctx.store.list_folders(workspace_id, prefix).await {
        folders.insert(record.path);
    }

    let mut aggregate = TaskStats::default();
    for file in &files {
        let log = ctx.store.appends_for_file(file.id, None, None).await;
        let s = task_stats(&log, now);
        aggregate.pending += s.pending;
        aggregate.claimed += s.claimed;
        aggregate.completed += s.completed;
        aggregate.stalled += s.stalled;
        aggregate.active_claims += s.active_claims;
    }

    Ok(StatsView {
        file_count: files.len(),
        folder_count: folders.len(),
        total_size: files.iter().map(|f| f.size_bytes()).sum(),
        updated_at: files.iter().map(|f| f.updated_at).max(),
        task_stats: aggregate,
    })
}
