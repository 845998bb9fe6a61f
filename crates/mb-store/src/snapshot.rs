// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace snapshot persistence.
//!
//! Each workspace serialises to one JSON file named `<workspace-id>.json`
//! under the data dir.  On startup every snapshot is hydrated back into the
//! tables; after a mutation the daemon spawns a fire-and-forget persist of
//! the touched workspace.  Idempotency records and the audit buffer are
//! deliberately not part of a snapshot.

use crate::{Store, StoreError, Tables};
use mb_core::{
    ApiKeyRecord, AppendEntry, CapabilityKey, FileRecord, FolderRecord, WebhookSubscription,
    Workspace,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

/// Serialised form of one workspace's tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    /// The workspace row.
    pub workspace: Workspace,
    /// All file rows, deleted included.
    pub files: Vec<FileRecord>,
    /// Explicit folder rows.
    pub folders: Vec<FolderRecord>,
    /// Append logs keyed by file id.
    pub appends: HashMap<Uuid, Vec<AppendEntry>>,
    /// Per-file public id counters.
    pub append_seq: HashMap<Uuid, u64>,
    /// Capability keys.
    pub keys: Vec<CapabilityKey>,
    /// API keys.
    pub api_keys: Vec<ApiKeyRecord>,
    /// Webhook subscriptions.
    pub webhooks: Vec<WebhookSubscription>,
}

fn snapshot_path(root: &Path, workspace_id: Uuid) -> PathBuf {
    let mut p = root.to_path_buf();
    p.push(format!("{workspace_id}.json"));
    p
}

impl Store {
    /// Open a durable store rooted at `dir`, hydrating every snapshot found.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut tables = Tables::default();
        tables.next_rowid = 1;

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(err) => {
                    error!(path = %path.display(), error = ?err, "failed to read snapshot");
                    continue;
                }
            };
            let snapshot: WorkspaceSnapshot = match serde_json::from_slice(&bytes) {
                Ok(s) => s,
                Err(err) => {
                    error!(path = %path.display(), error = ?err, "failed to parse snapshot");
                    continue;
                }
            };
            hydrate(&mut tables, snapshot);
        }

        let loaded = tables.workspaces.len();
        if loaded > 0 {
            info!(workspaces = loaded, dir = %dir.display(), "hydrated snapshots");
        }

        Ok(Self {
            tables: RwLock::new(tables),
            data_dir: Some(dir),
        })
    }

    /// Serialise one workspace's tables.
    pub async fn snapshot_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<WorkspaceSnapshot, StoreError> {
        let tables = self.tables.read().await;
        let workspace = tables
            .workspaces
            .get(&workspace_id)
            .cloned()
            .ok_or(StoreError::WorkspaceNotFound)?;

        let files: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect();
        let file_ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();

        Ok(WorkspaceSnapshot {
            workspace,
            appends: file_ids
                .iter()
                .filter_map(|id| tables.appends.get(id).map(|log| (*id, log.clone())))
                .collect(),
            append_seq: file_ids
                .iter()
                .filter_map(|id| tables.append_seq.get(id).map(|seq| (*id, *seq)))
                .collect(),
            files,
            folders: tables
                .folders
                .values()
                .filter(|f| f.workspace_id == workspace_id)
                .cloned()
                .collect(),
            keys: tables
                .keys
                .values()
                .filter(|k| k.workspace_id == workspace_id)
                .cloned()
                .collect(),
            api_keys: tables
                .api_keys
                .values()
                .filter(|k| k.workspace_id == workspace_id)
                .cloned()
                .collect(),
            webhooks: tables
                .webhooks
                .values()
                .filter(|w| w.workspace_id == workspace_id)
                .cloned()
                .collect(),
        })
    }

    /// Write one workspace's snapshot to disk.  No-op for in-memory stores.
    pub async fn persist_workspace(&self, workspace_id: Uuid) -> Result<(), StoreError> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let snapshot = self.snapshot_workspace(workspace_id).await?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let path = snapshot_path(dir, workspace_id);
        fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Persist every workspace; used at shutdown.
    pub async fn persist_all(&self) -> Result<(), StoreError> {
        if self.data_dir.is_none() {
            return Ok(());
        }
        let ids: Vec<Uuid> = {
            let tables = self.tables.read().await;
            tables.workspaces.keys().copied().collect()
        };
        for id in ids {
            self.persist_workspace(id).await?;
        }
        Ok(())
    }
}

fn hydrate(tables: &mut Tables, snapshot: WorkspaceSnapshot) {
    let ws_id = snapshot.workspace.id;
    tables.workspaces.insert(ws_id, snapshot.workspace);

    for file in snapshot.files {
        if file.deleted_at.is_none() {
            tables
                .path_index
                .insert((ws_id, file.path.clone()), file.id);
        }
        tables.files.insert(file.id, file);
    }
    for folder in snapshot.folders {
        tables
            .folder_index
            .insert((ws_id, folder.path.clone()), folder.id);
        tables.folders.insert(folder.id, folder);
    }
    for (file_id, log) in snapshot.appends {
        for entry in &log {
            if entry.rowid >= tables.next_rowid {
                tables.next_rowid = entry.rowid + 1;
            }
        }
        tables.appends.insert(file_id, log);
    }
    for (file_id, seq) in snapshot.append_seq {
        tables.append_seq.insert(file_id, seq);
    }
    for key in snapshot.keys {
        tables.key_hash_index.insert(key.hash.clone(), key.id);
        tables.keys.insert(key.id, key);
    }
    for key in snapshot.api_keys {
        tables.api_keys.insert(key.hash.clone(), key);
    }
    for sub in snapshot.webhooks {
        tables.webhooks.insert(sub.id, sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewAppend;
    use mb_core::{AppendType, Priority};
    use std::collections::BTreeSet;

    fn draft() -> NewAppend {
        NewAppend {
            author: "ava".into(),
            kind: AppendType::Task,
            status: None,
            priority: Priority::Medium,
            labels: BTreeSet::new(),
            target: None,
            content_preview: Some("do the thing".into()),
            content_hash: None,
            expires_at: None,
            due_at: None,
        }
    }

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ws_id;
        let file_id;
        {
            let store = Store::open(dir.path()).await.unwrap();
            let ws = store.create_workspace("ws").await;
            ws_id = ws.id;
            let now = chrono::Utc::now();
            let file = FileRecord {
                id: Uuid::new_v4(),
                workspace_id: ws.id,
                path: "/notes.md".into(),
                content: "hello".into(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
                settings: None,
            };
            file_id = file.id;
            store.insert_file(file).await.unwrap();
            store.insert_append(file_id, draft()).await.unwrap();
            store.adjust_storage(ws.id, 5).await.unwrap();
            store.persist_workspace(ws.id).await.unwrap();
        }

        let reopened = Store::open(dir.path()).await.unwrap();
        let ws = reopened.workspace(ws_id).await.unwrap();
        assert_eq!(ws.storage_used_bytes, 5);
        let file = reopened.file_by_path(ws_id, "/notes.md").await.unwrap();
        assert_eq!(file.id, file_id);
        assert_eq!(file.content, "hello");

        // Rowid counter resumes past the hydrated maximum.
        let next = reopened.insert_append(file_id, draft()).await.unwrap();
        assert_eq!(next.public_id, "a2");
        assert!(next.rowid >= 2);
    }

    #[tokio::test]
    async fn in_memory_persist_is_noop() {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        store.persist_workspace(ws.id).await.unwrap();
        store.persist_all().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bogus.json"), b"{not json")
            .await
            .unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        // Store still opens; nothing hydrated.
        assert!(store.data_dir().is_some());
    }
}
