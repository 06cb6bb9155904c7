//! Tez lifecycle (§4.6): share, reply, get, thread, stream.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::acl;
use crate::audit::AuditSink;
use crate::config::config;
use crate::error::{AppError, AppResult};
use crate::federation::{self, FederationService};
use crate::store::models::{AuditAction, ContextLayer, ContextSource, Tez, TezContext, TezRecipient, TezType, Urgency, Visibility};
use crate::store::{NewContext, NewTez, Store, TezAdmission};

/// One context layer as supplied by a caller, before `tezId` is assigned.
#[derive(Debug, Clone)]
pub struct ContextInput {
    pub layer: ContextLayer,
    pub content: serde_json::Value,
    pub mime_type: Option<String>,
    pub confidence: Option<u8>,
    pub source: Option<ContextSource>,
    pub derived_from: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub team_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub surface_text: String,
    pub tez_type: TezType,
    pub urgency: Urgency,
    pub action_requested: Option<String>,
    pub visibility: Visibility,
    pub recipients: Vec<String>,
    pub context: Vec<ContextInput>,
}

pub struct TezDetail {
    pub tez: Tez,
    pub context: Vec<TezContext>,
    pub recipients: Vec<TezRecipient>,
}

pub struct ThreadResult {
    pub thread_id: Uuid,
    pub root_tez_id: Uuid,
    pub messages: Vec<Tez>,
}

pub struct Messaging {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    federation: Arc<FederationService>,
}

impl Messaging {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditSink>, federation: Arc<FederationService>) -> Self {
        Self {
            store,
            audit,
            federation,
        }
    }

    fn validate_share(&self, req: &ShareRequest) -> AppResult<()> {
        let cfg = config();
        if req.surface_text.trim().is_empty() {
            return Err(AppError::Validation("surfaceText must not be empty".into()));
        }
        if req.surface_text.len() > cfg.max_tez_size_bytes {
            return Err(AppError::Validation("surfaceText exceeds maxTezSizeBytes".into()));
        }
        if req.context.len() > cfg.max_context_items {
            return Err(AppError::Validation(format!(
                "context exceeds maxContextItems ({})",
                cfg.max_context_items
            )));
        }
        if req.recipients.len() > cfg.max_recipients {
            return Err(AppError::Validation(format!(
                "recipients exceeds maxRecipients ({})",
                cfg.max_recipients
            )));
        }
        Ok(())
    }

    async fn admit_scope(&self, actor: &str, team_id: Option<Uuid>, conversation_id: Option<Uuid>) -> AppResult<()> {
        if let Some(team_id) = team_id {
            let member = self
                .store
                .get_team_member(team_id, actor)
                .await
                .map_err(AppError::Internal)?;
            if member.is_none() {
                return Err(AppError::Forbidden("not a member of this team".into()));
            }
        } else if let Some(conversation_id) = conversation_id {
            let is_member = self
                .store
                .is_conversation_member(conversation_id, actor)
                .await
                .map_err(AppError::Internal)?;
            if !is_member {
                return Err(AppError::Forbidden("not a member of this conversation".into()));
            }
        }
        Ok(())
    }

    pub async fn share(&self, actor: &str, req: ShareRequest) -> AppResult<Tez> {
        self.validate_share(&req)?;
        self.admit_scope(actor, req.team_id, req.conversation_id).await?;

        let id = Uuid::new_v4();
        let new_tez = NewTez {
            id,
            team_id: req.team_id,
            conversation_id: req.conversation_id,
            thread_id: id,
            parent_tez_id: None,
            surface_text: req.surface_text,
            tez_type: req.tez_type,
            urgency: req.urgency,
            action_requested: req.action_requested,
            sender_user_id: actor.to_string(),
            visibility: req.visibility,
        };

        let (local, remote) = federation::partition_recipients(&req.recipients, &config().relay_host);

        let context: Vec<NewContext> = req
            .context
            .into_iter()
            .map(|c| NewContext {
                layer: c.layer,
                content: c.content,
                mime_type: c.mime_type,
                confidence: c.confidence,
                source: c.source,
                derived_from: c.derived_from,
                created_by: actor.to_string(),
            })
            .collect();

        let tez = self
            .store
            .admit_tez(TezAdmission {
                tez: new_tez,
                context,
                local_recipients: local,
            })
            .await
            .map_err(AppError::Internal)?;

        if !remote.is_empty() {
            let full_context = self.store.get_tez_context(tez.id).await.map_err(AppError::Internal)?;
            self.federation
                .enqueue_outbound(&tez, &full_context, actor, remote)
                .await
                .map_err(AppError::Internal)?;
        }

        self.audit
            .record(
                tez.team_id,
                actor,
                AuditAction::TezShared,
                "tez",
                &tez.id.to_string(),
                json!({ "visibility": tez.visibility }),
            )
            .await;

        Ok(tez)
    }

    pub async fn reply(&self, actor: &str, parent_id: Uuid, req: ShareRequest) -> AppResult<Tez> {
        let parent = self
            .store
            .get_tez(parent_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound("tez".into()))?;

        acl::may_access(self.store.as_ref(), actor, &parent).await?;

        let mut req = req;
        req.team_id = parent.team_id;
        req.conversation_id = parent.conversation_id;
        req.visibility = parent.visibility;
        self.validate_share(&req)?;

        let id = Uuid::new_v4();
        let new_tez = NewTez {
            id,
            team_id: parent.team_id,
            conversation_id: parent.conversation_id,
            thread_id: parent.thread_id,
            parent_tez_id: Some(parent.id),
            surface_text: req.surface_text,
            tez_type: req.tez_type,
            urgency: req.urgency,
            action_requested: req.action_requested,
            sender_user_id: actor.to_string(),
            visibility: parent.visibility,
        };

        let (local, remote) = federation::partition_recipients(&req.recipients, &config().relay_host);
        let context: Vec<NewContext> = req
            .context
            .into_iter()
            .map(|c| NewContext {
                layer: c.layer,
                content: c.content,
                mime_type: c.mime_type,
                confidence: c.confidence,
                source: c.source,
                derived_from: c.derived_from,
                created_by: actor.to_string(),
            })
            .collect();

        let tez = self
            .store
            .admit_tez(TezAdmission {
                tez: new_tez,
                context,
                local_recipients: local,
            })
            .await
            .map_err(AppError::Internal)?;

        if !remote.is_empty() {
            let full_context = self.store.get_tez_context(tez.id).await.map_err(AppError::Internal)?;
            self.federation
                .enqueue_outbound(&tez, &full_context, actor, remote)
                .await
                .map_err(AppError::Internal)?;
        }

        self.audit
            .record(
                tez.team_id,
                actor,
                AuditAction::TezReplied,
                "tez",
                &tez.id.to_string(),
                json!({ "parentTezId": parent.id, "threadId": tez.thread_id }),
            )
            .await;

        Ok(tez)
    }

    pub async fn get(&self, actor: &str, id: Uuid) -> AppResult<TezDetail> {
        let tez = self
            .store
            .get_tez(id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound("tez".into()))?;

        acl::may_access(self.store.as_ref(), actor, &tez).await?;

        let context = self.store.get_tez_context(id).await.map_err(AppError::Internal)?;
        let recipients = self.store.get_tez_recipients(id).await.map_err(AppError::Internal)?;

        if actor != tez.sender_user_id {
            self.audit
                .record(tez.team_id, actor, AuditAction::TezRead, "tez", &id.to_string(), json!({}))
                .await;
        }

        Ok(TezDetail { tez, context, recipients })
    }

    pub async fn thread(&self, actor: &str, any_id: Uuid) -> AppResult<ThreadResult> {
        let tez = self
            .store
            .get_tez(any_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound("tez".into()))?;

        acl::may_access(self.store.as_ref(), actor, &tez).await?;

        let messages = self.store.get_thread(tez.thread_id).await.map_err(AppError::Internal)?;
        let root_tez_id = messages
            .iter()
            .find(|t| t.parent_tez_id.is_none())
            .map(|t| t.id)
            .unwrap_or(tez.thread_id);

        Ok(ThreadResult {
            thread_id: tez.thread_id,
            root_tez_id,
            messages,
        })
    }

    pub async fn stream(
        &self,
        actor: &str,
        team_id: Uuid,
        limit: Option<i64>,
        before: Option<OffsetDateTime>,
    ) -> AppResult<(Vec<Tez>, bool)> {
        let member = self
            .store
            .get_team_member(team_id, actor)
            .await
            .map_err(AppError::Internal)?;
        if member.is_none() {
            return Err(AppError::Forbidden("not a member of this team".into()));
        }

        let limit = match limit {
            Some(l) if l > 100 => return Err(AppError::Validation("limit must not exceed 100".into())),
            Some(l) => l.max(1),
            None => 20,
        };
        self.store
            .stream_team(team_id, limit, before)
            .await
            .map_err(AppError::Internal)
    }
}
