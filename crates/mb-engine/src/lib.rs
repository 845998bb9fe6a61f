// SPDX-License-Identifier: MIT OR Apache-2.0
//! The business core: file mutation, append insertion, orchestration
//! projection, claim lifecycle, idempotency replay, and search/stats.
//!
//! Every operation takes a resolved [`mb_auth::Authorization`] plus a
//! [`RequestMeta`] and returns typed results in the closed error taxonomy.
//! Side effects (audit entries, webhook events) flow through the context's
//! queue and sink; nothing here blocks on them.

#![deny(unsafe_code)]

mod appends;
mod claims;
mod context;
mod cursor;
mod files;
mod frontmatter;
mod idempotency;
mod orchestrate;
mod search;

pub use appends::{
    AppendListQuery, AppendListing, AppendRequest, append_entry, get_append, list_appends,
};
pub use claims::{ClaimOpResult, block_claim, cancel_claim, complete_claim, renew_claim};
pub use context::{EngineContext, EngineLimits, RequestMeta};
pub use cursor::{decode_offset, decode_rowid, encode_offset, encode_rowid};
pub use files::{
    BulkItemResult, BulkRequest, DeleteOutcome, EntryKind, FileView, FolderListQuery,
    FolderListing, ListEntry, MintedKeys, MoveOutcome, ReadFormat, ReadOptions, RecoverOutcome,
    ShareOutcome, SortKey, SortOrder, UpsertOutcome, UpsertRequest, bulk_create, copy_file,
    create_folder, delete_file, delete_folder, list_folder, move_file, read_file, recover_file,
    rename_file, rotate_file_keys, share_scope, update_settings, upsert,
};
pub use frontmatter::parse_frontmatter;
pub use idempotency::{StoredResponse, lookup_replay, store_response};
pub use orchestrate::{
    ActiveClaim, ClaimView, TaskFilter, TaskListing, TaskState, TaskStats, TaskView, list_claims,
    list_tasks, project_tasks, task_stats,
};
pub use search::{SearchQuery, SearchResult, SearchResultItem, StatsView, search, stats};
