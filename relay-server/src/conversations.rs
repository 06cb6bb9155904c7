//! DM and group conversations (§4.7): creation, membership, unread cursors.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::messaging::{ContextInput, Messaging, ShareRequest};
use crate::store::models::{ConversationMember, ConversationSummary, ConversationType, Tez, TezType, Urgency, Visibility};
use crate::store::Store;

pub struct Conversations {
    store: Arc<dyn Store>,
    messaging: Arc<Messaging>,
}

impl Conversations {
    pub fn new(store: Arc<dyn Store>, messaging: Arc<Messaging>) -> Self {
        Self { store, messaging }
    }

    pub async fn create(
        &self,
        actor: &str,
        conversation_type: ConversationType,
        member_ids: Vec<String>,
        name: Option<String>,
    ) -> AppResult<(crate::store::models::Conversation, Vec<ConversationMember>)> {
        match conversation_type {
            ConversationType::Dm => {
                let other = member_ids
                    .first()
                    .filter(|_| member_ids.len() == 1)
                    .ok_or_else(|| AppError::Validation("dm requires exactly one other member".into()))?;
                if let Some(existing) = self.store.find_dm(actor, other).await.map_err(AppError::Internal)? {
                    let members = self
                        .store
                        .list_conversation_members(existing.id)
                        .await
                        .map_err(AppError::Internal)?;
                    return Ok((existing, members));
                }
                let conv = self
                    .store
                    .create_conversation(ConversationType::Dm, None, actor, &[actor.to_string(), other.clone()])
                    .await
                    .map_err(AppError::Internal)?;
                let members = self
                    .store
                    .list_conversation_members(conv.id)
                    .await
                    .map_err(AppError::Internal)?;
                Ok((conv, members))
            }
            ConversationType::Group => {
                if member_ids.is_empty() {
                    return Err(AppError::Validation("group requires at least one member".into()));
                }
                let name = name.filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| AppError::Validation("group requires a non-empty name".into()))?;
                let mut all_members = member_ids;
                if !all_members.iter().any(|m| m == actor) {
                    all_members.push(actor.to_string());
                }
                let conv = self
                    .store
                    .create_conversation(ConversationType::Group, Some(&name), actor, &all_members)
                    .await
                    .map_err(AppError::Internal)?;
                let members = self
                    .store
                    .list_conversation_members(conv.id)
                    .await
                    .map_err(AppError::Internal)?;
                Ok((conv, members))
            }
        }
    }

    pub async fn list(&self, actor: &str) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self
            .store
            .list_conversations_for_user(actor)
            .await
            .map_err(AppError::Internal)?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let last_message = self
                .store
                .conversation_last_message(conversation.id)
                .await
                .map_err(AppError::Internal)?;
            let unread_count = self
                .store
                .conversation_unread_count(conversation.id, actor)
                .await
                .map_err(AppError::Internal)?;
            summaries.push(ConversationSummary {
                conversation,
                last_message,
                unread_count,
            });
        }
        Ok(summaries)
    }

    async fn require_member(&self, conversation_id: Uuid, actor: &str) -> AppResult<()> {
        let is_member = self
            .store
            .is_conversation_member(conversation_id, actor)
            .await
            .map_err(AppError::Internal)?;
        if !is_member {
            return Err(AppError::Forbidden("not a member of this conversation".into()));
        }
        Ok(())
    }

    pub async fn messages(
        &self,
        actor: &str,
        conversation_id: Uuid,
        limit: Option<i64>,
        before: Option<OffsetDateTime>,
    ) -> AppResult<(Vec<Tez>, bool)> {
        self.require_member(conversation_id, actor).await?;
        let limit = match limit {
            Some(l) if l > 100 => return Err(AppError::Validation("limit must not exceed 100".into())),
            Some(l) => l.max(1),
            None => 20,
        };
        self.store
            .list_conversation_messages(conversation_id, limit, before)
            .await
            .map_err(AppError::Internal)
    }

    pub async fn send_message(
        &self,
        actor: &str,
        conversation_id: Uuid,
        surface_text: String,
        context: Vec<ContextInput>,
    ) -> AppResult<Tez> {
        self.require_member(conversation_id, actor).await?;
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound("conversation".into()))?;

        let members = self
            .store
            .list_conversation_members(conversation_id)
            .await
            .map_err(AppError::Internal)?;
        let recipients: Vec<String> = members
            .iter()
            .filter(|m| m.user_id != actor)
            .map(|m| m.user_id.clone())
            .collect();

        let visibility = match conversation.conversation_type {
            ConversationType::Dm => Visibility::Dm,
            ConversationType::Group => Visibility::Group,
        };

        self.messaging
            .share(
                actor,
                ShareRequest {
                    team_id: None,
                    conversation_id: Some(conversation_id),
                    surface_text,
                    tez_type: TezType::Note,
                    urgency: Urgency::Normal,
                    action_requested: None,
                    visibility,
                    recipients,
                    context,
                },
            )
            .await
    }

    pub async fn mark_read(&self, actor: &str, conversation_id: Uuid) -> AppResult<()> {
        self.require_member(conversation_id, actor).await?;
        self.store
            .mark_conversation_read(conversation_id, actor)
            .await
            .map_err(AppError::Internal)
    }
}
