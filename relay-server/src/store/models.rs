//! Entity types (§3). Semantic shape, not storage syntax — `Store`
//! implementations translate these to and from rows.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: String,
    pub role: TeamRole,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Dm,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub name: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: Uuid,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_read_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<TezSummary>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TezSummary {
    pub id: Uuid,
    pub surface_text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub sender_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub tez_address: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Contact {
    /// Public profile omits `email`.
    pub fn public(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "displayName": self.display_name,
            "avatarUrl": self.avatar_url,
            "tezAddress": self.tez_address,
            "status": self.status,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TezType {
    Note,
    Decision,
    Handoff,
    Question,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    High,
    Normal,
    Low,
    Fyi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Team,
    Dm,
    Group,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TezStatus {
    Active,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tez {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub thread_id: Uuid,
    pub parent_tez_id: Option<Uuid>,
    pub surface_text: String,
    #[serde(rename = "type")]
    pub tez_type: TezType,
    pub urgency: Urgency,
    pub action_requested: Option<String>,
    pub sender_user_id: String,
    pub visibility: Visibility,
    pub status: TezStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Tez {
    pub fn to_summary(&self) -> TezSummary {
        TezSummary {
            id: self.id,
            surface_text: self.surface_text.clone(),
            created_at: self.created_at,
            sender_user_id: self.sender_user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLayer {
    Background,
    Fact,
    Artifact,
    Relationship,
    Constraint,
    Hint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Stated,
    Inferred,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TezContext {
    pub id: Uuid,
    pub tez_id: Uuid,
    pub layer: ContextLayer,
    pub content: serde_json::Value,
    pub mime_type: Option<String>,
    pub confidence: Option<u8>,
    pub source: Option<ContextSource>,
    pub derived_from: Option<String>,
    pub created_by: String,
}

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TezRecipient {
    pub tez_id: Uuid,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub acknowledged_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Pending,
    Trusted,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub server_id: String,
    pub public_key: String,
    pub display_name: Option<String>,
    pub trust_level: TrustLevel,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    InFlight,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundDelivery {
    pub id: Uuid,
    pub target_host: String,
    pub bundle: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub next_attempt_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TezShared,
    TezReplied,
    TezRead,
    TezReceived,
    TezAcknowledged,
    TezArchived,
    TezDeleted,
    TeamCreated,
    TeamMemberAdded,
    TeamMemberRemoved,
    ContactRegistered,
    ContactUpdated,
    PeerTrusted,
    PeerBlocked,
    PeerRemoved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TezShared => "tez.shared",
            Self::TezReplied => "tez.replied",
            Self::TezRead => "tez.read",
            Self::TezReceived => "tez.received",
            Self::TezAcknowledged => "tez.acknowledged",
            Self::TezArchived => "tez.archived",
            Self::TezDeleted => "tez.deleted",
            Self::TeamCreated => "team.created",
            Self::TeamMemberAdded => "team.member_added",
            Self::TeamMemberRemoved => "team.member_removed",
            Self::ContactRegistered => "contact.registered",
            Self::ContactUpdated => "contact.updated",
            Self::PeerTrusted => "peer.trusted",
            Self::PeerBlocked => "peer.blocked",
            Self::PeerRemoved => "peer.removed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub actor_user_id: String,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: String,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
