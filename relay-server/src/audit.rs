//! Append-only audit trail (§4.9).
//!
//! `AuditSink` is an explicit dependency rather than a module-level
//! singleton so services can be built and tested with a recording
//! double. The production sink writes through the same `Store` the
//! service already holds; a write failure is logged and does not roll
//! back the caller's operation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::models::{AuditAction, AuditEntry};
use crate::store::Store;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        team_id: Option<Uuid>,
        actor_user_id: &str,
        action: AuditAction,
        target_type: &str,
        target_id: &str,
        metadata: Value,
    );
}

pub struct StoreAuditSink {
    store: Arc<dyn Store>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(
        &self,
        team_id: Option<Uuid>,
        actor_user_id: &str,
        action: AuditAction,
        target_type: &str,
        target_id: &str,
        metadata: Value,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            team_id,
            actor_user_id: actor_user_id.to_string(),
            action,
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            metadata,
            created_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.store.record_audit(entry).await {
            tracing::warn!(error = %e, action = action.as_str(), target_id, "failed to record audit entry");
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingAuditSink {
        pub entries: Mutex<Vec<(Option<Uuid>, String, AuditAction, String, String, Value)>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn record(
            &self,
            team_id: Option<Uuid>,
            actor_user_id: &str,
            action: AuditAction,
            target_type: &str,
            target_id: &str,
            metadata: Value,
        ) {
            self.entries.lock().await.push((
                team_id,
                actor_user_id.to_string(),
                action,
                target_type.to_string(),
                target_id.to_string(),
                metadata,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingAuditSink;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_sink_captures_entry() {
        let sink = RecordingAuditSink::default();
        sink.record(None, "alice", AuditAction::TezShared, "tez", "t-1", json!({}))
            .await;
        let entries = sink.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, "alice");
        assert_eq!(entries[0].2, AuditAction::TezShared);
    }

    #[tokio::test]
    async fn test_store_sink_persists_through_store() {
        use crate::store::memory::MemStore;
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let sink = StoreAuditSink::new(store.clone());
        sink.record(None, "alice", AuditAction::TezShared, "tez", "t-1", json!({}))
            .await;
        let found = store.list_audit_for_target("t-1").await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
