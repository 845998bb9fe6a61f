// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared operation context: store handle, audit queue, event sink, limits.

use chrono::Utc;
use mb_audit::AuditQueue;
use mb_auth::Authorization;
use mb_core::{AuditAction, AuditEntry, EventKind, EventSink, WebhookEvent};
use mb_store::Store;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Size limits enforced by the file engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Per-workspace storage quota in bytes.
    pub workspace_quota_bytes: u64,
    /// Per-file content cap in bytes.
    pub file_max_bytes: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            workspace_quota_bytes: 100 * 1024 * 1024,
            file_max_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Per-request metadata threaded into audit entries and idempotency.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Resolved originating client IP.
    pub ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// `Idempotency-Key` header value.
    pub idempotency_key: Option<String>,
}

/// Everything an engine operation needs besides its inputs.
#[derive(Clone)]
pub struct EngineContext {
    /// The store.
    pub store: Arc<Store>,
    /// Audit queue handle.
    pub audit: AuditQueue,
    /// Webhook event sink.
    pub events: Arc<dyn EventSink>,
    /// Size limits.
    pub limits: EngineLimits,
}

impl EngineContext {
    /// Assemble a context.
    pub fn new(
        store: Arc<Store>,
        audit: AuditQueue,
        events: Arc<dyn EventSink>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            store,
            audit,
            events,
            limits,
        }
    }

    /// Build and enqueue an audit entry for a capability-authorized action.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn audit_event(
        &self,
        auth: &Authorization,
        meta: &RequestMeta,
        action: AuditAction,
        resource_type: &str,
        resource_id: Option<String>,
        resource_path: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) {
        self.audit.enqueue(self.build_audit(
            auth,
            meta,
            action,
            resource_type,
            resource_id,
            resource_path,
            metadata,
        ));
    }

    /// Synchronous audit write, for trails that must survive a crash.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn audit_event_sync(
        &self,
        auth: &Authorization,
        meta: &RequestMeta,
        action: AuditAction,
        resource_type: &str,
        resource_id: Option<String>,
        resource_path: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) {
        self.audit
            .log_sync(self.build_audit(
                auth,
                meta,
                action,
                resource_type,
                resource_id,
                resource_path,
                metadata,
            ))
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    fn build_audit(
        &self,
        auth: &Authorization,
        meta: &RequestMeta,
        action: AuditAction,
        resource_type: &str,
        resource_id: Option<String>,
        resource_path: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            workspace_id: auth.workspace_id,
            action,
            resource_type: resource_type.to_string(),
            resource_id,
            resource_path,
            actor: auth.prefix.clone(),
            actor_type: "capability".into(),
            metadata,
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    /// Publish a webhook event.
    pub(crate) fn publish(
        &self,
        workspace_id: Uuid,
        kind: EventKind,
        path: &str,
        resource_id: Option<Uuid>,
        payload: serde_json::Value,
    ) {
        self.events.publish(WebhookEvent {
            kind,
            workspace_id,
            path: path.to_string(),
            resource_id,
            payload,
            occurred_at: Utc::now(),
        });
    }
}
