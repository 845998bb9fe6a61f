// SPDX-License-Identifier: MIT OR Apache-2.0
//! Webhook event types and the publisher seam.
//!
//! The mutation engines emit [`WebhookEvent`]s through an [`EventSink`];
//! the daemon wires in the real dispatcher, tests wire in [`NullSink`] or a
//! recording sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of outbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A file was created.
    #[serde(rename = "file.created")]
    FileCreated,
    /// A file's content or settings changed.
    #[serde(rename = "file.updated")]
    FileUpdated,
    /// A file was deleted (soft or permanent).
    #[serde(rename = "file.deleted")]
    FileDeleted,
    /// An explicit folder was created.
    #[serde(rename = "folder.created")]
    FolderCreated,
    /// A folder was deleted.
    #[serde(rename = "folder.deleted")]
    FolderDeleted,
    /// An append entry was inserted.
    #[serde(rename = "append.created")]
    AppendCreated,
}

impl EventKind {
    /// Stable dotted tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileCreated => "file.created",
            Self::FileUpdated => "file.updated",
            Self::FileDeleted => "file.deleted",
            Self::FolderCreated => "folder.created",
            Self::FolderDeleted => "folder.deleted",
            Self::AppendCreated => "append.created",
        }
    }
}

/// An event bound for matching webhook subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Event kind.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Originating workspace.
    pub workspace_id: Uuid,
    /// Path of the touched resource.
    pub path: String,
    /// Record id of the touched resource, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<Uuid>,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
    /// When the mutation happened.
    pub occurred_at: DateTime<Utc>,
}

/// Publisher seam between the mutation engines and the webhook dispatcher.
///
/// `publish` must not block: real implementations hand the event to a
/// background task and return.
pub trait EventSink: Send + Sync {
    /// Fire-and-forget delivery of one event.
    fn publish(&self, event: WebhookEvent);
}

/// Sink that drops every event; the default for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: WebhookEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_dotted() {
        assert_eq!(EventKind::FileCreated.as_str(), "file.created");
        let json = serde_json::to_string(&EventKind::AppendCreated).unwrap();
        assert_eq!(json, "\"append.created\"");
    }

    #[test]
    fn event_wire_shape() {
        let event = WebhookEvent {
            kind: EventKind::FileUpdated,
            workspace_id: Uuid::nil(),
            path: "/a.md".into(),
            resource_id: None,
            payload: serde_json::json!({"etag": "\"abc\""}),
            occurred_at: Utc::now(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "file.updated");
        assert_eq!(v["path"], "/a.md");
    }
}
