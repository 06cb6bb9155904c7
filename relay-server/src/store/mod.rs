//! Typed persistence for the entities in §3.
//!
//! `Store` is the single shared mutable resource (§5): every service takes
//! one as an explicit dependency rather than reaching for a global pool.
//! `PgStore` is the production Postgres-backed implementation; `MemStore`
//! (test-only) is an in-memory double used by unit and scenario tests that
//! don't need a live database.

pub mod db;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use uuid::Uuid;

use models::*;

#[derive(Debug, Clone)]
pub struct NewTez {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub thread_id: Uuid,
    pub parent_tez_id: Option<Uuid>,
    pub surface_text: String,
    pub tez_type: TezType,
    pub urgency: Urgency,
    pub action_requested: Option<String>,
    pub sender_user_id: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct NewContext {
    pub layer: ContextLayer,
    pub content: serde_json::Value,
    pub mime_type: Option<String>,
    pub confidence: Option<u8>,
    pub source: Option<ContextSource>,
    pub derived_from: Option<String>,
    pub created_by: String,
}

/// Everything the Tez-admission transaction (§5 Ordering) needs to write
/// atomically: the Tez itself, its context layers, and the resolved local
/// recipient set. Remote routing and outbound enqueue are handled by the
/// Federation component on top of this.
#[derive(Debug, Clone)]
pub struct TezAdmission {
    pub tez: NewTez,
    pub context: Vec<NewContext>,
    pub local_recipients: Vec<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Team
    async fn create_team(&self, name: &str, created_by: &str) -> anyhow::Result<Team>;
    async fn get_team(&self, id: Uuid) -> anyhow::Result<Option<Team>>;
    async fn list_team_members(&self, team_id: Uuid) -> anyhow::Result<Vec<TeamMember>>;
    async fn get_team_member(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<Option<TeamMember>>;
    async fn list_teams_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Team>>;
    async fn add_team_member(&self, team_id: Uuid, user_id: &str, role: TeamRole) -> anyhow::Result<TeamMember>;
    async fn remove_team_member(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<()>;
    async fn count_team_admins(&self, team_id: Uuid) -> anyhow::Result<i64>;

    // Contact
    async fn upsert_contact(
        &self,
        user_id: &str,
        display_name: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
        tez_address: &str,
    ) -> anyhow::Result<Contact>;
    async fn get_contact(&self, user_id: &str) -> anyhow::Result<Option<Contact>>;
    async fn search_contacts(&self, query: &str, limit: i64) -> anyhow::Result<Vec<Contact>>;

    // Conversation
    async fn find_dm(&self, user_a: &str, user_b: &str) -> anyhow::Result<Option<Conversation>>;
    async fn create_conversation(
        &self,
        conversation_type: ConversationType,
        name: Option<&str>,
        created_by: &str,
        member_ids: &[String],
    ) -> anyhow::Result<Conversation>;
    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>>;
    async fn is_conversation_member(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<bool>;
    async fn list_conversation_members(&self, conversation_id: Uuid) -> anyhow::Result<Vec<ConversationMember>>;
    async fn list_conversations_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Conversation>>;
    async fn conversation_last_message(&self, conversation_id: Uuid) -> anyhow::Result<Option<TezSummary>>;
    async fn conversation_unread_count(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<i64>;
    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<()>;

    // Tez
    async fn admit_tez(&self, admission: TezAdmission) -> anyhow::Result<Tez>;
    async fn ingest_remote_tez(
        &self,
        tez: Tez,
        context: Vec<NewContext>,
        local_recipients: Vec<String>,
    ) -> anyhow::Result<()>;
    async fn get_tez(&self, id: Uuid) -> anyhow::Result<Option<Tez>>;
    async fn get_tez_context(&self, tez_id: Uuid) -> anyhow::Result<Vec<TezContext>>;
    async fn get_tez_recipients(&self, tez_id: Uuid) -> anyhow::Result<Vec<TezRecipient>>;
    async fn get_thread(&self, thread_id: Uuid) -> anyhow::Result<Vec<Tez>>;
    async fn stream_team(&self, team_id: Uuid, limit: i64, before: Option<time::OffsetDateTime>) -> anyhow::Result<(Vec<Tez>, bool)>;
    async fn list_conversation_messages(&self, conversation_id: Uuid, limit: i64, before: Option<time::OffsetDateTime>) -> anyhow::Result<(Vec<Tez>, bool)>;
    async fn team_unread_count(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<i64>;
    async fn mark_team_read(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<()>;

    // Peer / Trust
    async fn get_peer_by_host(&self, host: &str) -> anyhow::Result<Option<Peer>>;
    async fn get_peer_by_server_id(&self, server_id: &str) -> anyhow::Result<Option<Peer>>;
    async fn upsert_peer(
        &self,
        host: &str,
        server_id: &str,
        public_key: &str,
        display_name: Option<&str>,
        default_trust: TrustLevel,
    ) -> anyhow::Result<Peer>;
    async fn list_peers(&self) -> anyhow::Result<Vec<Peer>>;
    async fn set_peer_trust(&self, server_id: &str, trust_level: TrustLevel) -> anyhow::Result<Option<Peer>>;
    async fn remove_peer(&self, server_id: &str) -> anyhow::Result<bool>;

    // Outbound delivery
    async fn enqueue_delivery(&self, target_host: &str, bundle: serde_json::Value) -> anyhow::Result<OutboundDelivery>;
    async fn list_outbox(&self) -> anyhow::Result<Vec<OutboundDelivery>>;

    // Audit
    async fn record_audit(&self, entry: AuditEntry) -> anyhow::Result<()>;
    async fn list_audit_for_target(&self, target_id: &str) -> anyhow::Result<Vec<AuditEntry>>;

    // Health
    async fn ping(&self) -> anyhow::Result<()>;
}
