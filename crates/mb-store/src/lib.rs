// SPDX-License-Identifier: MIT OR Apache-2.0
//! The store: in-process tables behind a single async `RwLock`.
//!
//! The store is the only shared mutable resource in the service.  Every
//! invariant the data model promises — path uniqueness among non-deleted
//! files, the non-negative storage counter, monotonic append ordering,
//! at-most-one idempotency record per token — is enforced at this boundary,
//! never in caller memory.
//!
//! Durability follows the snapshot pattern: each workspace serialises to a
//! JSON file under the data dir and is re-hydrated at startup (see
//! [`snapshot`]).  Tests use [`Store::in_memory`].

#![deny(unsafe_code)]

pub mod index;
pub mod snapshot;

use chrono::{DateTime, Utc};
use mb_core::{
    ApiKeyRecord, AppendEntry, AppendType, AuditEntry, CapabilityKey, FileRecord, FolderRecord,
    IdempotencyRecord, Priority, ScopeType, WebhookSubscription, Workspace,
};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use index::{DocSource, SearchDoc, SearchHit, rank_bm25, tokenize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Store-level failures.  Handlers classify these into API errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No workspace with that id.
    #[error("workspace not found")]
    WorkspaceNotFound,
    /// No live file with that id / path.
    #[error("file not found")]
    FileNotFound,
    /// No folder record at that path.
    #[error("folder not found")]
    FolderNotFound,
    /// No append entry with that id.
    #[error("append not found")]
    AppendNotFound,
    /// No capability key with that id.
    #[error("key not found")]
    KeyNotFound,
    /// No webhook subscription with that id.
    #[error("webhook not found")]
    WebhookNotFound,
    /// The `(workspace, path)` uniqueness constraint fired; `winner` is the
    /// row that holds the path.
    #[error("path already taken: {path}")]
    PathTaken {
        /// The contested path.
        path: String,
        /// Id of the row holding the path.
        winner: Uuid,
    },
    /// An explicit folder record already exists at the path.
    #[error("folder already exists: {path}")]
    FolderTaken {
        /// The contested path.
        path: String,
    },
    /// Snapshot I/O failure.
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot decode failure.
    #[error("snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// This call created the record.
    Inserted,
    /// A record already existed; the stored copy is returned.
    Existing(IdempotencyRecord),
}

/// Outcome of an audit batch write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditBatchOutcome {
    /// Rows written.
    pub written: usize,
    /// Rows dropped because their workspace no longer exists.
    pub dropped: usize,
}

/// Fields for a new append entry; the store assigns id, rowid, public id,
/// and the insertion timestamp.
#[derive(Debug, Clone)]
pub struct NewAppend {
    /// Validated author string.
    pub author: String,
    /// Entry type.
    pub kind: AppendType,
    /// Free-form status tag.
    pub status: Option<String>,
    /// Priority.
    pub priority: Priority,
    /// Label set.
    pub labels: BTreeSet<String>,
    /// Public id of the referenced entry, if any.
    pub target: Option<String>,
    /// Truncated content preview.
    pub content_preview: Option<String>,
    /// Parent file content hash at insertion.
    pub content_hash: Option<String>,
    /// Lease expiry (claims).
    pub expires_at: Option<DateTime<Utc>>,
    /// Due date (tasks).
    pub due_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    workspaces: HashMap<Uuid, Workspace>,
    files: HashMap<Uuid, FileRecord>,
    /// `(workspace, path)` → file id, non-deleted rows only.
    path_index: HashMap<(Uuid, String), Uuid>,
    folders: HashMap<Uuid, FolderRecord>,
    folder_index: HashMap<(Uuid, String), Uuid>,
    appends: HashMap<Uuid, Vec<AppendEntry>>,
    /// Per-file dense public id counter.
    append_seq: HashMap<Uuid, u64>,
    /// Global monotonic insertion order; starts at 1.
    next_rowid: u64,
    keys: HashMap<Uuid, CapabilityKey>,
    key_hash_index: HashMap<String, Uuid>,
    api_keys: HashMap<String, ApiKeyRecord>,
    idempotency: HashMap<String, IdempotencyRecord>,
    webhooks: HashMap<Uuid, WebhookSubscription>,
    audit: Vec<AuditEntry>,
}

/// The process-wide store handle.
#[derive(Debug)]
pub struct Store {
    tables: RwLock<Tables>,
    data_dir: Option<PathBuf>,
}

impl Store {
    /// A store with no durability, for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_rowid: 1,
                ..Tables::default()
            }),
            data_dir: None,
        }
    }

    /// Directory snapshots are written to, when durable.
    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir.as_ref()
    }

    // -----------------------------------------------------------------------
    // Workspaces
    // -----------------------------------------------------------------------

    /// Create a workspace.
    pub async fn create_workspace(&self, name: impl Into<String>) -> Workspace {
        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
            deleted_at: None,
            storage_used_bytes: 0,
            claimed_at: None,
        };
        let mut tables = self.tables.write().await;
        tables.workspaces.insert(workspace.id, workspace.clone());
        workspace
    }

    /// Fetch a live workspace.
    pub async fn workspace(&self, id: Uuid) -> Result<Workspace, StoreError> {
        let tables = self.tables.read().await;
        tables
            .workspaces
            .get(&id)
            .filter(|ws| ws.deleted_at.is_none())
            .cloned()
            .ok_or(StoreError::WorkspaceNotFound)
    }

    /// Bind the workspace to an owner by stamping `claimed_at`.
    pub async fn claim_workspace(&self, id: Uuid) -> Result<Workspace, StoreError> {
        let mut tables = self.tables.write().await;
        let workspace = tables
            .workspaces
            .get_mut(&id)
            .ok_or(StoreError::WorkspaceNotFound)?;
        if workspace.claimed_at.is_none() {
            workspace.claimed_at = Some(Utc::now());
        }
        Ok(workspace.clone())
    }

    /// Atomically adjust the storage counter, clamping at zero.
    ///
    /// Returns the new value.
    pub async fn adjust_storage(&self, id: Uuid, delta: i64) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let workspace = tables
            .workspaces
            .get_mut(&id)
            .ok_or(StoreError::WorkspaceNotFound)?;
        workspace.storage_used_bytes = if delta >= 0 {
            workspace.storage_used_bytes.saturating_add(delta as u64)
        } else {
            workspace
                .storage_used_bytes
                .saturating_sub(delta.unsigned_abs())
        };
        Ok(workspace.storage_used_bytes)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Insert a new file row, enforcing `(workspace, path)` uniqueness among
    /// non-deleted rows.
    pub async fn insert_file(&self, file: FileRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = (file.workspace_id, file.path.clone());
        if let Some(winner) = tables.path_index.get(&slot) {
            return Err(StoreError::PathTaken {
                path: file.path,
                winner: *winner,
            });
        }
        tables.path_index.insert(slot, file.id);
        tables.files.insert(file.id, file);
        Ok(())
    }

    /// Fetch a file row by id (deleted or not).
    pub async fn file_by_id(&self, id: Uuid) -> Result<FileRecord, StoreError> {
        let tables = self.tables.read().await;
        tables.files.get(&id).cloned().ok_or(StoreError::FileNotFound)
    }

    /// Fetch the live file at a path.
    pub async fn file_by_path(
        &self,
        workspace_id: Uuid,
        path: &str,
    ) -> Result<FileRecord, StoreError> {
        let tables = self.tables.read().await;
        let id = tables
            .path_index
            .get(&(workspace_id, path.to_string()))
            .ok_or(StoreError::FileNotFound)?;
        tables.files.get(id).cloned().ok_or(StoreError::FileNotFound)
    }

    /// Most recently soft-deleted file at a path, if any.
    pub async fn deleted_file_by_path(
        &self,
        workspace_id: Uuid,
        path: &str,
    ) -> Option<FileRecord> {
        let tables = self.tables.read().await;
        tables
            .files
            .values()
            .filter(|f| {
                f.workspace_id == workspace_id && f.path == path && f.deleted_at.is_some()
            })
            .max_by_key(|f| f.deleted_at)
            .cloned()
    }

    /// Replace a file row in place (content, settings, timestamps).
    ///
    /// The path must not change through this method; use
    /// [`Store::change_file_path`].
    pub async fn update_file(&self, file: FileRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let existing = tables.files.get(&file.id).ok_or(StoreError::FileNotFound)?;
        debug_assert_eq!(existing.path, file.path, "update_file must not move");
        tables.files.insert(file.id, file);
        Ok(())
    }

    /// Move a live file to a new path, enforcing uniqueness at the target.
    pub async fn change_file_path(&self, id: Uuid, new_path: &str) -> Result<FileRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables.files.get(&id).cloned().ok_or(StoreError::FileNotFound)?;
        if file.deleted_at.is_some() {
            return Err(StoreError::FileNotFound);
        }
        let target = (file.workspace_id, new_path.to_string());
        if let Some(winner) = tables.path_index.get(&target) {
            if *winner != id {
                return Err(StoreError::PathTaken {
                    path: new_path.to_string(),
                    winner: *winner,
                });
            }
            return Ok(file);
        }
        tables.path_index.remove(&(file.workspace_id, file.path.clone()));
        tables.path_index.insert(target, id);
        let file = tables.files.get_mut(&id).ok_or(StoreError::FileNotFound)?;
        file.path = new_path.to_string();
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    /// Soft-delete: stamp `deleted_at` and release the path slot.
    pub async fn soft_delete_file(&self, id: Uuid) -> Result<FileRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables.files.get_mut(&id).ok_or(StoreError::FileNotFound)?;
        if file.deleted_at.is_some() {
            return Err(StoreError::FileNotFound);
        }
        file.deleted_at = Some(Utc::now());
        let key = (file.workspace_id, file.path.clone());
        let snapshot = file.clone();
        tables.path_index.remove(&key);
        Ok(snapshot)
    }

    /// Remove the row and its append log entirely.
    pub async fn hard_delete_file(&self, id: Uuid) -> Result<FileRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables.files.remove(&id).ok_or(StoreError::FileNotFound)?;
        tables
            .path_index
            .remove(&(file.workspace_id, file.path.clone()));
        tables.appends.remove(&id);
        tables.append_seq.remove(&id);
        Ok(file)
    }

    /// Restore a soft-deleted file, re-acquiring its path slot.
    pub async fn restore_file(&self, id: Uuid) -> Result<FileRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables.files.get(&id).cloned().ok_or(StoreError::FileNotFound)?;
        if file.deleted_at.is_none() {
            return Ok(file);
        }
        let slot = (file.workspace_id, file.path.clone());
        if let Some(winner) = tables.path_index.get(&slot) {
            return Err(StoreError::PathTaken {
                path: file.path,
                winner: *winner,
            });
        }
        tables.path_index.insert(slot, id);
        let file = tables.files.get_mut(&id).ok_or(StoreError::FileNotFound)?;
        file.deleted_at = None;
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    /// Live files under a folder prefix (`"/"` lists the workspace).
    pub async fn list_files(&self, workspace_id: Uuid, prefix: &str) -> Vec<FileRecord> {
        let tables = self.tables.read().await;
        let mut files: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| {
                f.workspace_id == workspace_id
                    && f.deleted_at.is_none()
                    && mb_path::scope_contains(prefix, &f.path)
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Hard-delete files whose recovery window has passed; returns them.
    pub async fn purge_expired_deleted(&self, now: DateTime<Utc>) -> Vec<FileRecord> {
        let mut tables = self.tables.write().await;
        let expired: Vec<Uuid> = tables
            .files
            .values()
            .filter(|f| {
                f.recovery_deadline()
                    .map(|deadline| deadline <= now)
                    .unwrap_or(false)
            })
            .map(|f| f.id)
            .collect();
        let mut purged = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(file) = tables.files.remove(&id) {
                tables.appends.remove(&id);
                tables.append_seq.remove(&id);
                purged.push(file);
            }
        }
        purged
    }

    // -----------------------------------------------------------------------
    // Folders
    // -----------------------------------------------------------------------

    /// Insert an explicit folder record.
    pub async fn insert_folder(&self, folder: FolderRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = (folder.workspace_id, folder.path.clone());
        if tables.folder_index.contains_key(&slot) {
            return Err(StoreError::FolderTaken { path: folder.path });
        }
        tables.folder_index.insert(slot, folder.id);
        tables.folders.insert(folder.id, folder);
        Ok(())
    }

    /// Fetch an explicit folder record by canonical path.
    pub async fn folder_by_path(
        &self,
        workspace_id: Uuid,
        path: &str,
    ) -> Result<FolderRecord, StoreError> {
        let tables = self.tables.read().await;
        let id = tables
            .folder_index
            .get(&(workspace_id, path.to_string()))
            .ok_or(StoreError::FolderNotFound)?;
        tables
            .folders
            .get(id)
            .cloned()
            .ok_or(StoreError::FolderNotFound)
    }

    /// Remove an explicit folder record.
    pub async fn delete_folder(&self, workspace_id: Uuid, path: &str) -> Result<FolderRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let id = tables
            .folder_index
            .remove(&(workspace_id, path.to_string()))
            .ok_or(StoreError::FolderNotFound)?;
        tables.folders.remove(&id).ok_or(StoreError::FolderNotFound)
    }

    /// Explicit folder records under a prefix.
    pub async fn list_folders(&self, workspace_id: Uuid, prefix: &str) -> Vec<FolderRecord> {
        let tables = self.tables.read().await;
        let mut folders: Vec<FolderRecord> = tables
            .folders
            .values()
            .filter(|f| {
                f.workspace_id == workspace_id && mb_path::scope_contains(prefix, &f.path)
            })
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.path.cmp(&b.path));
        folders
    }

    // -----------------------------------------------------------------------
    // Appends
    // -----------------------------------------------------------------------

    /// Insert an append entry, assigning the global rowid and the per-file
    /// dense public id.
    pub async fn insert_append(
        &self,
        file_id: Uuid,
        new: NewAppend,
    ) -> Result<AppendEntry, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.files.contains_key(&file_id) {
            return Err(StoreError::FileNotFound);
        }
        let rowid = tables.next_rowid;
        tables.next_rowid += 1;
        let seq = tables.append_seq.entry(file_id).or_insert(0);
        *seq += 1;
        let entry = AppendEntry {
            id: Uuid::new_v4(),
            file_id,
            rowid,
            public_id: format!("a{seq}"),
            author: new.author,
            kind: new.kind,
            status: new.status,
            priority: new.priority,
            labels: new.labels,
            target: new.target,
            content_preview: new.content_preview,
            content_hash: new.content_hash,
            expires_at: new.expires_at,
            due_at: new.due_at,
            created_at: Utc::now(),
        };
        tables.appends.entry(file_id).or_default().push(entry.clone());
        Ok(entry)
    }

    /// Append entries for a file, oldest first, filtered by a rowid cursor
    /// and bounded by `limit` (the most recent `limit` when set).
    pub async fn appends_for_file(
        &self,
        file_id: Uuid,
        since_rowid: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<AppendEntry> {
        let tables = self.tables.read().await;
        let mut entries: Vec<AppendEntry> = tables
            .appends
            .get(&file_id)
            .map(|log| {
                log.iter()
                    .filter(|e| since_rowid.map(|c| e.rowid > c).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = limit
            && entries.len() > limit
        {
            entries.drain(..entries.len() - limit);
        }
        entries
    }

    /// Number of append entries on a file.
    pub async fn count_appends(&self, file_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        tables.appends.get(&file_id).map(Vec::len).unwrap_or(0)
    }

    /// One append by its per-file public id.
    pub async fn append_by_public_id(
        &self,
        file_id: Uuid,
        public_id: &str,
    ) -> Result<AppendEntry, StoreError> {
        let tables = self.tables.read().await;
        tables
            .appends
            .get(&file_id)
            .and_then(|log| log.iter().find(|e| e.public_id == public_id))
            .cloned()
            .ok_or(StoreError::AppendNotFound)
    }

    /// Locate an append by public id anywhere in a workspace.
    ///
    /// Public ids are per-file; when several files share one, the most
    /// recently inserted entry wins (highest rowid).
    pub async fn find_append_in_workspace(
        &self,
        workspace_id: Uuid,
        public_id: &str,
    ) -> Option<(FileRecord, AppendEntry)> {
        let tables = self.tables.read().await;
        let mut best: Option<(FileRecord, AppendEntry)> = None;
        for (file_id, log) in &tables.appends {
            let Some(file) = tables.files.get(file_id) else {
                continue;
            };
            if file.workspace_id != workspace_id {
                continue;
            }
            for entry in log {
                if entry.public_id == public_id
                    && best
                        .as_ref()
                        .map(|(_, b)| entry.rowid > b.rowid)
                        .unwrap_or(true)
                {
                    best = Some((file.clone(), entry.clone()));
                }
            }
        }
        best
    }

    /// Denormalize a claim's lease expiry after a renew.
    pub async fn update_append_expiry(
        &self,
        append_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<AppendEntry, StoreError> {
        let mut tables = self.tables.write().await;
        for log in tables.appends.values_mut() {
            if let Some(entry) = log.iter_mut().find(|e| e.id == append_id) {
                entry.expires_at = Some(expires_at);
                return Ok(entry.clone());
            }
        }
        Err(StoreError::AppendNotFound)
    }

    /// Appends whose recorded content hash no longer matches `current_hash`.
    pub async fn count_stale_appends(&self, file_id: Uuid, current_hash: &str) -> usize {
        let tables = self.tables.read().await;
        tables
            .appends
            .get(&file_id)
            .map(|log| {
                log.iter()
                    .filter(|e| {
                        e.content_hash
                            .as_deref()
                            .map(|h| h != current_hash)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Capability keys
    // -----------------------------------------------------------------------

    /// Insert a capability key record.
    pub async fn insert_capability_key(&self, key: CapabilityKey) {
        let mut tables = self.tables.write().await;
        tables.key_hash_index.insert(key.hash.clone(), key.id);
        tables.keys.insert(key.id, key);
    }

    /// Lookup by plaintext hash (the only lookup path).
    pub async fn capability_key_by_hash(&self, hash: &str) -> Option<CapabilityKey> {
        let tables = self.tables.read().await;
        let id = tables.key_hash_index.get(hash)?;
        tables.keys.get(id).cloned()
    }

    /// Non-revoked keys scoped to a specific file path.
    pub async fn keys_for_file_scope(
        &self,
        workspace_id: Uuid,
        path: &str,
    ) -> Vec<CapabilityKey> {
        let tables = self.tables.read().await;
        tables
            .keys
            .values()
            .filter(|k| {
                k.workspace_id == workspace_id
                    && k.revoked_at.is_none()
                    && k.scope_type == ScopeType::File
                    && k.scope_path.as_deref() == Some(path)
            })
            .cloned()
            .collect()
    }

    /// Repoint file-scope keys at a file's new path after a move or rename,
    /// so existing capability URLs keep tracking the file.
    pub async fn retarget_file_keys(
        &self,
        workspace_id: Uuid,
        old_path: &str,
        new_path: &str,
    ) -> usize {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for key in tables.keys.values_mut() {
            if key.workspace_id == workspace_id
                && key.scope_type == ScopeType::File
                && key.scope_path.as_deref() == Some(old_path)
            {
                key.scope_path = Some(new_path.to_string());
                changed += 1;
            }
        }
        changed
    }

    /// Stamp `revoked_at` on a key.
    pub async fn revoke_key(&self, id: Uuid) -> Result<CapabilityKey, StoreError> {
        let mut tables = self.tables.write().await;
        let key = tables.keys.get_mut(&id).ok_or(StoreError::KeyNotFound)?;
        if key.revoked_at.is_none() {
            key.revoked_at = Some(Utc::now());
        }
        Ok(key.clone())
    }

    /// Insert an API key record.
    pub async fn insert_api_key(&self, key: ApiKeyRecord) {
        let mut tables = self.tables.write().await;
        tables.api_keys.insert(key.hash.clone(), key);
    }

    /// Lookup an API key by plaintext hash.
    pub async fn api_key_by_hash(&self, hash: &str) -> Option<ApiKeyRecord> {
        let tables = self.tables.read().await;
        tables.api_keys.get(hash).cloned()
    }

    // -----------------------------------------------------------------------
    // Idempotency
    // -----------------------------------------------------------------------

    /// Insert-if-absent keyed by token.  Concurrent first-time inserts
    /// converge on a single winner; losers receive the stored record.
    pub async fn put_idempotency_if_absent(
        &self,
        record: IdempotencyRecord,
    ) -> PutOutcome {
        let mut tables = self.tables.write().await;
        match tables.idempotency.get(&record.token) {
            Some(existing) => PutOutcome::Existing(existing.clone()),
            None => {
                tables.idempotency.insert(record.token.clone(), record);
                PutOutcome::Inserted
            }
        }
    }

    /// Lookup a stored idempotency record by token.
    pub async fn idempotency_by_token(&self, token: &str) -> Option<IdempotencyRecord> {
        let tables = self.tables.read().await;
        tables.idempotency.get(token).cloned()
    }

    // -----------------------------------------------------------------------
    // Webhooks
    // -----------------------------------------------------------------------

    /// Insert a webhook subscription.
    pub async fn insert_webhook(&self, sub: WebhookSubscription) {
        let mut tables = self.tables.write().await;
        tables.webhooks.insert(sub.id, sub);
    }

    /// All subscriptions for a workspace.
    pub async fn webhooks_for_workspace(&self, workspace_id: Uuid) -> Vec<WebhookSubscription> {
        let tables = self.tables.read().await;
        let mut subs: Vec<WebhookSubscription> = tables
            .webhooks
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        subs
    }

    /// Delete a subscription owned by the workspace.
    pub async fn delete_webhook(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<WebhookSubscription, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.webhooks.get(&id) {
            Some(sub) if sub.workspace_id == workspace_id => tables
                .webhooks
                .remove(&id)
                .ok_or(StoreError::WebhookNotFound),
            _ => Err(StoreError::WebhookNotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    /// Write a batch of audit rows.  Rows whose workspace has disappeared
    /// since enqueue are dropped and counted, not errored.
    pub async fn insert_audit_batch(&self, entries: Vec<AuditEntry>) -> AuditBatchOutcome {
        let mut tables = self.tables.write().await;
        let mut outcome = AuditBatchOutcome::default();
        for entry in entries {
            if tables.workspaces.contains_key(&entry.workspace_id) {
                tables.audit.push(entry);
                outcome.written += 1;
            } else {
                outcome.dropped += 1;
            }
        }
        outcome
    }

    /// Audit rows for a workspace, oldest first.
    pub async fn audit_for_workspace(&self, workspace_id: Uuid) -> Vec<AuditEntry> {
        let tables = self.tables.read().await;
        tables
            .audit
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Search support
    // -----------------------------------------------------------------------

    /// Collect searchable documents for a scope: file contents plus append
    /// previews, optionally restricted to one file path.
    pub async fn collect_search_docs(
        &self,
        workspace_id: Uuid,
        prefix: &str,
        file_path: Option<&str>,
    ) -> Vec<SearchDoc> {
        let tables = self.tables.read().await;
        let mut docs = Vec::new();
        for file in tables.files.values() {
            if file.workspace_id != workspace_id || file.deleted_at.is_some() {
                continue;
            }
            if let Some(path) = file_path {
                if file.path != path {
                    continue;
                }
            } else if !mb_path::scope_contains(prefix, &file.path) {
                continue;
            }
            docs.push(SearchDoc {
                file_id: file.id,
                path: file.path.clone(),
                source: DocSource::FileContent,
                text: file.content.clone(),
            });
            if let Some(log) = tables.appends.get(&file.id) {
                for entry in log {
                    if let Some(preview) = &entry.content_preview {
                        docs.push(SearchDoc {
                            file_id: file.id,
                            path: file.path.clone(),
                            source: DocSource::Append {
                                public_id: entry.public_id.clone(),
                                author: entry.author.clone(),
                                kind: entry.kind,
                                status: entry.status.clone(),
                            },
                            text: preview.clone(),
                        });
                    }
                }
            }
        }
        docs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mb_core::content_hash;

    fn new_file(workspace_id: Uuid, path: &str, content: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            workspace_id,
            path: path.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            settings: None,
        }
    }

    fn draft(kind: AppendType) -> NewAppend {
        NewAppend {
            author: "ava".into(),
            kind,
            status: None,
            priority: Priority::Medium,
            labels: BTreeSet::new(),
            target: None,
            content_preview: None,
            content_hash: None,
            expires_at: None,
            due_at: None,
        }
    }

    #[tokio::test]
    async fn path_uniqueness_among_live_rows() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let first = new_file(ws.id, "/a.md", "one");
        store.insert_file(first.clone()).await.unwrap();

        let err = store.insert_file(new_file(ws.id, "/a.md", "two")).await.unwrap_err();
        match err {
            StoreError::PathTaken { winner, .. } => assert_eq!(winner, first.id),
            other => panic!("unexpected: {other:?}"),
        }

        // Soft delete releases the slot.
        store.soft_delete_file(first.id).await.unwrap();
        store.insert_file(new_file(ws.id, "/a.md", "three")).await.unwrap();
    }

    #[tokio::test]
    async fn storage_counter_clamps_at_zero() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        assert_eq!(store.adjust_storage(ws.id, 100).await.unwrap(), 100);
        assert_eq!(store.adjust_storage(ws.id, -40).await.unwrap(), 60);
        assert_eq!(store.adjust_storage(ws.id, -1000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_ids_are_dense_and_rowids_monotonic() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/todo.md", "");
        store.insert_file(file.clone()).await.unwrap();
        let other = new_file(ws.id, "/other.md", "");
        store.insert_file(other.clone()).await.unwrap();

        let a1 = store.insert_append(file.id, draft(AppendType::Task)).await.unwrap();
        let b1 = store.insert_append(other.id, draft(AppendType::Task)).await.unwrap();
        let a2 = store.insert_append(file.id, draft(AppendType::Comment)).await.unwrap();

        assert_eq!(a1.public_id, "a1");
        assert_eq!(a2.public_id, "a2");
        assert_eq!(b1.public_id, "a1");
        assert!(a1.rowid < b1.rowid);
        assert!(b1.rowid < a2.rowid);
    }

    #[tokio::test]
    async fn since_cursor_returns_strictly_newer() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/todo.md", "");
        store.insert_file(file.clone()).await.unwrap();

        let first = store.insert_append(file.id, draft(AppendType::Task)).await.unwrap();
        let second = store.insert_append(file.id, draft(AppendType::Comment)).await.unwrap();

        let newer = store.appends_for_file(file.id, Some(first.rowid), None).await;
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, second.id);

        let all = store.appends_for_file(file.id, None, None).await;
        assert_eq!(all.len(), 2);
        assert!(all[0].rowid < all[1].rowid);
    }

    #[tokio::test]
    async fn limit_keeps_most_recent_in_order() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/todo.md", "");
        store.insert_file(file.clone()).await.unwrap();
        for _ in 0..5 {
            store.insert_append(file.id, draft(AppendType::Comment)).await.unwrap();
        }
        let tail = store.appends_for_file(file.id, None, Some(2)).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].public_id, "a4");
        assert_eq!(tail[1].public_id, "a5");
    }

    #[tokio::test]
    async fn stale_append_count_tracks_hash() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/todo.md", "v1");
        store.insert_file(file.clone()).await.unwrap();

        let mut new = draft(AppendType::Comment);
        new.content_hash = Some(content_hash("v1"));
        store.insert_append(file.id, new).await.unwrap();

        assert_eq!(store.count_stale_appends(file.id, &content_hash("v1")).await, 0);
        assert_eq!(store.count_stale_appends(file.id, &content_hash("v2")).await, 1);
    }

    #[tokio::test]
    async fn idempotency_insert_if_absent() {
        let store = Store::in_memory();
        let record = IdempotencyRecord {
            token: "tok-1".into(),
            key_id: Uuid::new_v4(),
            status: 201,
            body: serde_json::json!({"ok": true}),
            created_at: Utc::now(),
        };
        assert_eq!(
            store.put_idempotency_if_absent(record.clone()).await,
            PutOutcome::Inserted
        );
        let mut loser = record.clone();
        loser.status = 500;
        match store.put_idempotency_if_absent(loser).await {
            PutOutcome::Existing(stored) => assert_eq!(stored.status, 201),
            PutOutcome::Inserted => panic!("must replay the winner"),
        }
    }

    #[tokio::test]
    async fn restore_respects_new_occupant() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let original = new_file(ws.id, "/a.md", "one");
        store.insert_file(original.clone()).await.unwrap();
        store.soft_delete_file(original.id).await.unwrap();

        let occupant = new_file(ws.id, "/a.md", "two");
        store.insert_file(occupant.clone()).await.unwrap();

        let err = store.restore_file(original.id).await.unwrap_err();
        assert!(matches!(err, StoreError::PathTaken { winner, .. } if winner == occupant.id));
    }

    #[tokio::test]
    async fn purge_respects_recovery_window() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/a.md", "x");
        store.insert_file(file.clone()).await.unwrap();
        store.soft_delete_file(file.id).await.unwrap();

        assert!(store.purge_expired_deleted(Utc::now()).await.is_empty());
        let future = Utc::now() + chrono::Duration::days(8);
        let purged = store.purge_expired_deleted(future).await;
        assert_eq!(purged.len(), 1);
        assert!(store.file_by_id(file.id).await.is_err());
    }

    #[tokio::test]
    async fn audit_batch_drops_orphans() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let good = AuditEntry {
            id: Uuid::new_v4(),
            workspace_id: ws.id,
            action: mb_core::AuditAction::FileCreate,
            resource_type: "file".into(),
            resource_id: None,
            resource_path: Some("/a.md".into()),
            actor: "r_ab".into(),
            actor_type: "capability".into(),
            metadata: Default::default(),
            ip: None,
            user_agent: None,
            created_at: Utc::now(),
        };
        let mut orphan = good.clone();
        orphan.id = Uuid::new_v4();
        orphan.workspace_id = Uuid::new_v4();

        let outcome = store.insert_audit_batch(vec![good, orphan]).await;
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(store.audit_for_workspace(ws.id).await.len(), 1);
    }

    #[tokio::test]
    async fn search_docs_cover_content_and_previews() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let file = new_file(ws.id, "/docs/a.md", "alpha beta");
        store.insert_file(file.clone()).await.unwrap();
        let mut new = draft(AppendType::Task);
        new.content_preview = Some("gamma delta".into());
        store.insert_append(file.id, new).await.unwrap();

        let docs = store.collect_search_docs(ws.id, "/docs/", None).await;
        assert_eq!(docs.len(), 2);
        let docs = store.collect_search_docs(ws.id, "/", Some("/docs/a.md")).await;
        assert_eq!(docs.len(), 2);
        let docs = store.collect_search_docs(ws.id, "/other/", None).await;
        assert!(docs.is_empty());
    }
}
