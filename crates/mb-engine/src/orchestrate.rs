// SPDX-License-Identifier: MIT OR Apache-2.0
//! The orchestration projector: derives task state from the append log.
//!
//! State is always *derived*; the stored claim row's `expires_at` may be
//! denormalized by renew, but the projector re-reads the log every time:
//!
//! * **pending** — a task with no response and no live claim;
//! * **claimed** — a task with an unexpired, uncancelled claim and no
//!   response;
//! * **completed** — a task with at least one response, regardless of
//!   claims;
//! * **stalled** — a task whose most recent live claim has expired and that
//!   has no response.
//!
//! Multiple live claims collapse to the latest by insertion order; a claim
//! cancelled by a `cancel` entry stops counting entirely.

use crate::context::EngineContext;
use crate::cursor::{decode_rowid, encode_rowid};
use chrono::{DateTime, Utc};
use mb_auth::Authorization;
use mb_core::{AppendEntry, AppendType, FileRecord, Priority};
use mb_error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Derived task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// No response, no live claim.
    Pending,
    /// A live, unexpired claim holds the task.
    Claimed,
    /// A response exists.
    Completed,
    /// The latest live claim expired without a response.
    Stalled,
}

impl TaskState {
    /// Parse a lowercase tag.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "claimed" => Self::Claimed,
            "completed" => Self::Completed,
            "stalled" => Self::Stalled,
            _ => return None,
        })
    }
}

/// The claim currently attached to a task view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveClaim {
    /// Public id of the claim entry.
    pub claim_id: String,
    /// Claimant author.
    pub agent: String,
    /// Lease expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds until expiry (zero once expired).
    pub expires_in_seconds: i64,
}

/// One projected task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    /// Public id of the task entry.
    pub task_id: String,
    /// Path of the owning file.
    pub file: String,
    /// Derived state.
    pub state: TaskState,
    /// Task priority.
    pub priority: Priority,
    /// Task labels.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// Task author.
    pub author: String,
    /// Content preview of the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    /// Due date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Latest live claim, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<ActiveClaim>,
    /// Number of responses referencing the task.
    pub response_count: usize,
    /// Internal ordering handle for cursors.
    #[serde(skip)]
    pub rowid: u64,
}

/// Aggregate task statistics for one file or scope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    /// Tasks with no response and no live claim.
    pub pending: usize,
    /// Tasks held by an unexpired claim.
    pub claimed: usize,
    /// Tasks with a response.
    pub completed: usize,
    /// Tasks whose latest claim expired unanswered.
    pub stalled: usize,
    /// Unexpired, uncancelled claims across all tasks.
    pub active_claims: usize,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Project every task in one file's append log.
pub fn project_tasks(file: &FileRecord, log: &[AppendEntry], now: DateTime<Utc>) -> Vec<TaskView> {
    project_path(&file.path, log, now)
}

fn project_path(file_path: &str, log: &[AppendEntry], now: DateTime<Utc>) -> Vec<TaskView> {
    let cancelled: HashSet<&str> = log
        .iter()
        .filter(|e| e.kind == AppendType::Cancel)
        .filter_map(|e| e.target.as_deref())
        .collect();

    log.iter()
        .filter(|entry| entry.kind == AppendType::Task)
        .map(|task| {
            let responses = log
                .iter()
                .filter(|e| {
                    e.kind == AppendType::Response && e.target.as_deref() == Some(&task.public_id)
                })
                .count();

            let latest_claim = log
                .iter()
                .filter(|e| {
                    e.kind == AppendType::Claim
                        && e.target.as_deref() == Some(&task.public_id)
                        && !cancelled.contains(e.public_id.as_str())
                })
                .max_by_key(|e| e.rowid);

            let state = if responses > 0 {
                TaskState::Completed
            } else {
                match latest_claim {
                    Some(claim) if claim_live(claim, now) => TaskState::Claimed,
                    Some(_) => TaskState::Stalled,
                    None => TaskState::Pending,
                }
            };

            let claim = latest_claim.map(|claim| ActiveClaim {
                claim_id: claim.public_id.clone(),
                agent: claim.author.clone(),
                expires_at: claim.expires_at,
                expires_in_seconds: claim
                    .expires_at
                    .map(|at| (at - now).num_seconds().max(0))
                    .unwrap_or(0),
            });

            TaskView {
                task_id: task.public_id.clone(),
                file: file_path.to_string(),
                state,
                priority: task.priority,
                labels: task.labels.clone(),
                author: task.author.clone(),
                content_preview: task.content_preview.clone(),
                due_at: task.due_at,
                created_at: task.created_at,
                claim,
                response_count: responses,
                rowid: task.rowid,
            }
        })
        .collect()
}

fn claim_live(claim: &AppendEntry, now: DateTime<Utc>) -> bool {
    match claim.expires_at {
        Some(expires_at) => expires_at > now,
        // A claim without a lease bound never goes stale on its own.
        None => true,
    }
}

/// Aggregate statistics over one append log.
pub fn task_stats(log: &[AppendEntry], now: DateTime<Utc>) -> TaskStats {
    let cancelled: HashSet<&str> = log
        .iter()
        .filter(|e| e.kind == AppendType::Cancel)
        .filter_map(|e| e.target.as_deref())
        .collect();

    let mut stats = TaskStats::default();
    for view in project_path("", log, now) {
        match view.state {
            TaskState::Pending => stats.pending += 1,
            TaskState::Claimed => stats.claimed += 1,
            TaskState::Completed => stats.completed += 1,
            TaskState::Stalled => stats.stalled += 1,
        }
    }
    stats.active_claims = log
        .iter()
        .filter(|e| {
            e.kind == AppendType::Claim
                && !cancelled.contains(e.public_id.as_str())
                && claim_live(e, now)
        })
        .count();
    stats
}

// ---------------------------------------------------------------------------
// Filtered listing
// ---------------------------------------------------------------------------

/// Filters for the task listing surface.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to these states.
    pub states: Option<BTreeSet<TaskState>>,
    /// Restrict to these priorities.
    pub priorities: Option<BTreeSet<Priority>>,
    /// Match the latest claimant's author.
    pub agent: Option<String>,
    /// Restrict to one file path.
    pub file: Option<String>,
    /// Restrict to a folder prefix.
    pub folder: Option<String>,
    /// Shorthand for pending-or-stalled.
    pub claimable: bool,
    /// Page size.
    pub limit: Option<usize>,
    /// Rowid cursor from a prior page.
    pub cursor: Option<String>,
}

/// A page of projected tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskListing {
    /// Tasks in insertion order.
    pub tasks: Vec<TaskView>,
    /// Aggregate stats over the filtered scope (pre-pagination).
    pub stats: TaskStats,
    /// Cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// List projected tasks across the key's scope.
pub async fn list_tasks(
    ctx: &EngineContext,
    auth: &Authorization,
    filter: TaskFilter,
) -> ApiResult<TaskListing> {
    let now = Utc::now();
    let prefix = filter
        .folder
        .as_deref()
        .unwrap_or_else(|| auth.effective_prefix());
    if !mb_path::scope_contains(auth.effective_prefix(), prefix) {
        return Err(ApiError::not_found());
    }

    let since = match filter.cursor.as_deref() {
        Some(cursor) => Some(
            decode_rowid(cursor)
                .ok_or_else(|| ApiError::invalid_request("malformed cursor"))?,
        ),
        None => None,
    };

    let files = match filter.file.as_deref() {
        Some(path) => {
            if !mb_path::scope_contains(prefix, path) {
                return Err(ApiError::not_found());
            }
            match ctx.store.file_by_path(auth.workspace_id, path).await {
                Ok(file) => vec![file],
                Err(_) => Vec::new(),
            }
        }
        None => ctx.store.list_files(auth.workspace_id, prefix).await,
    };

    let mut tasks: Vec<TaskView> = Vec::new();
    let mut stats = TaskStats::default();
    for file in &files {
        let log = ctx.store.appends_for_file(file.id, None, None).await;
        let file_stats = task_stats(&log, now);
        stats.pending += file_stats.pending;
        stats.claimed += file_stats.claimed;
        stats.completed += file_stats.completed;
        stats.stalled += file_stats.stalled;
        stats.active_claims += file_stats.active_claims;
        tasks.extend(project_tasks(file, &log, now));
    }
    tasks.sort_by_key(|t| t.rowid);

    let filtered: Vec<TaskView> = tasks
        .into_iter()
        .filter(|task| {
            if let Some(states) = &filter.states
                && !states.contains(&task.state)
            {
                return false;
            }
            if filter.claimable
                && !matches!(task.state, TaskState::Pending | TaskState::Stalled)
            {
                return false;
            }
            if let Some(priorities) = &filter.priorities
                && !priorities.contains(&task.priority)
            {
                return false;
            }
            if let Some(agent) = filter.agent.as_deref()
                && task.claim.as_ref().map(|c| c.agent.as_str()) != Some(agent)
            {
                return false;
            }
            if let Some(cursor) = since
                && task.rowid <= cursor
            {
                return false;
            }
            true
        })
        .collect();

    let limit = filter.limit.unwrap_or(100);
    let mut page: Vec<TaskView> = filtered.into_iter().take(limit + 1).collect();
    let next_cursor = if page.len() > limit {
        page.truncate(limit);
        page.last().map(|t| encode_rowid(t.rowid))
    } else {
        None
    };

    Ok(TaskListing {
        tasks: page,
        stats,
        next_cursor,
    })
}

// ---------------------------------------------------------------------------
// Claims view
// ---------------------------------------------------------------------------

/// One row of the folder-scoped claims view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    /// Task the claim leases.
    pub task_id: String,
    /// Public id of the claim entry.
    pub claim_id: String,
    /// Owning file path.
    pub file: String,
    /// Task content preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_content: Option<String>,
    /// `active` or `expired`.
    pub status: String,
    /// Lease expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds until expiry (zero once expired).
    pub expires_in_seconds: i64,
}

/// List claims over uncompleted tasks within a folder subtree.
pub async fn list_claims(
    ctx: &EngineContext,
    auth: &Authorization,
    folder: Option<&str>,
) -> ApiResult<Vec<ClaimView>> {
    let now = Utc::now();
    let prefix = folder.unwrap_or_else(|| auth.effective_prefix());
    if !mb_path::scope_contains(auth.effective_prefix(), prefix) {
        return Err(ApiError::not_found());
    }

    let mut views = Vec::new();
    for file in ctx.store.list_files(auth.workspace_id, prefix).await {
        let log = ctx.store.appends_for_file(file.id, None, None).await;
        let cancelled: HashSet<&str> = log
            .iter()
            .filter(|e| e.kind == AppendType::Cancel)
            .filter_map(|e| e.target.as_deref())
            .collect();
        let completed: HashSet<&str> = log
            .iter()
            .filter(|e| e.kind == AppendType::Response)
            .filter_map(|e| e.target.as_deref())
            .collect();

        for claim in log.iter().filter(|e| e.kind == AppendType::Claim) {
            if cancelled.contains(claim.public_id.as_str()) {
                continue;
            }
            let Some(task_id) = claim.target.as_deref() else {
                continue;
            };
            if completed.contains(task_id) {
                continue;
            }
            let task = log
                .iter()
                .find(|e| e.kind == AppendType::Task && e.public_id == task_id);
            let live = claim_live(claim, now);
            views.push(ClaimView {
                task_id: task_id.to_string(),
                claim_id: claim.public_id.clone(),
                file: file.path.clone(),
                task_content: task.and_then(|t| t.content_preview.clone()),
                status: if live { "active" } else { "expired" }.to_string(),
                expires_at: claim.expires_at,
                expires_in_seconds: claim
                    .expires_at
                    .map(|at| (at - now).num_seconds().max(0))
                    .unwrap_or(0),
            });
        }
    }
    Ok(views)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn file() -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            path: "/todo.md".into(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            settings: None,
        }
    }

    fn entry(
        rowid: u64,
        public_id: &str,
        kind: AppendType,
        target: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppendEntry {
        AppendEntry {
            id: Uuid::new_v4(),
            file_id: Uuid::nil(),
            rowid,
            public_id: public_id.into(),
            author: "agent-1".into(),
            kind,
            status: None,
            priority: Priority::Medium,
            labels: BTreeSet::new(),
            target: target.map(str::to_string),
            content_preview: Some("work".into()),
            content_hash: None,
            expires_at,
            due_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bare_task_is_pending() {
        let now = Utc::now();
        let log = vec![entry(1, "a1", AppendType::Task, None, None)];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Pending);
        assert!(tasks[0].claim.is_none());
    }

    #[test]
    fn live_claim_marks_claimed() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now + Duration::minutes(30))),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Claimed);
        let claim = tasks[0].claim.as_ref().unwrap();
        assert_eq!(claim.claim_id, "a2");
        assert!(claim.expires_in_seconds > 0);
    }

    #[test]
    fn expired_claim_marks_stalled() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now - Duration::minutes(1))),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Stalled);
        assert_eq!(tasks[0].claim.as_ref().unwrap().expires_in_seconds, 0);
    }

    #[test]
    fn response_completes_despite_claims() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now - Duration::minutes(1))),
            entry(3, "a3", AppendType::Response, Some("a1"), None),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Completed);
        assert_eq!(tasks[0].response_count, 1);
    }

    #[test]
    fn latest_claim_wins() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now - Duration::minutes(5))),
            entry(3, "a3", AppendType::Claim, Some("a1"), Some(now + Duration::minutes(30))),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Claimed);
        assert_eq!(tasks[0].claim.as_ref().unwrap().claim_id, "a3");
    }

    #[test]
    fn cancelled_claim_returns_task_to_pending() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now + Duration::minutes(30))),
            entry(3, "a3", AppendType::Cancel, Some("a2"), None),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Pending);
    }

    #[test]
    fn renewed_lease_moves_stalled_back_to_claimed() {
        let now = Utc::now();
        // The renew operator rewrites expires_at on the claim row.
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Claim, Some("a1"), Some(now + Duration::minutes(30))),
            entry(3, "a3", AppendType::Renew, Some("a2"), None),
        ];
        let tasks = project_tasks(&file(), &log, now);
        assert_eq!(tasks[0].state, TaskState::Claimed);
    }

    #[test]
    fn stats_aggregate() {
        let now = Utc::now();
        let log = vec![
            entry(1, "a1", AppendType::Task, None, None),
            entry(2, "a2", AppendType::Task, None, None),
            entry(3, "a3", AppendType::Claim, Some("a2"), Some(now + Duration::minutes(10))),
            entry(4, "a4", AppendType::Task, None, None),
            entry(5, "a5", AppendType::Response, Some("a4"), None),
            entry(6, "a6", AppendType::Task, None, None),
            entry(7, "a7", AppendType::Claim, Some("a6"), Some(now - Duration::minutes(10))),
        ];
        let stats = task_stats(&log, now);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.stalled, 1);
        assert_eq!(stats.active_claims, 1);
    }

    #[test]
    fn task_state_parse() {
        assert_eq!(TaskState::parse("pending"), Some(TaskState::Pending));
        assert_eq!(TaskState::parse("stalled"), Some(TaskState::Stalled));
        assert_eq!(TaskState::parse("bogus"), None);
    }
}
