//! In-memory `Store` test double. Used by scenario tests (§8) and unit
//! tests that exercise service logic without a live Postgres connection.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::*;
use super::{NewContext, Store, TezAdmission};

#[derive(Default)]
struct Inner {
    teams: HashMap<Uuid, Team>,
    team_members: HashMap<Uuid, Vec<TeamMember>>,
    contacts: HashMap<String, Contact>,
    conversations: HashMap<Uuid, Conversation>,
    conversation_members: HashMap<Uuid, Vec<ConversationMember>>,
    tez: HashMap<Uuid, Tez>,
    tez_context: HashMap<Uuid, Vec<TezContext>>,
    tez_recipients: HashMap<Uuid, Vec<TezRecipient>>,
    peers: HashMap<String, Peer>,
    outbox: Vec<OutboundDelivery>,
    audit: Vec<AuditEntry>,
    team_read_cursor: HashMap<(Uuid, String), OffsetDateTime>,
}

pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_team(&self, name: &str, created_by: &str) -> anyhow::Result<Team> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let team = Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.teams.insert(team.id, team.clone());
        inner.team_members.insert(
            team.id,
            vec![TeamMember {
                team_id: team.id,
                user_id: created_by.to_string(),
                role: TeamRole::Admin,
                joined_at: now,
            }],
        );
        Ok(team)
    }

    async fn get_team(&self, id: Uuid) -> anyhow::Result<Option<Team>> {
        Ok(self.inner.lock().await.teams.get(&id).cloned())
    }

    async fn list_team_members(&self, team_id: Uuid) -> anyhow::Result<Vec<TeamMember>> {
        Ok(self
            .inner
            .lock()
            .await
            .team_members
            .get(&team_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_team_member(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<Option<TeamMember>> {
        Ok(self
            .inner
            .lock()
            .await
            .team_members
            .get(&team_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id).cloned()))
    }

    async fn list_teams_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Team>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .team_members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .filter_map(|(team_id, _)| inner.teams.get(team_id).cloned())
            .collect())
    }

    async fn add_team_member(&self, team_id: Uuid, user_id: &str, role: TeamRole) -> anyhow::Result<TeamMember> {
        let mut inner = self.inner.lock().await;
        let member = TeamMember {
            team_id,
            user_id: user_id.to_string(),
            role,
            joined_at: OffsetDateTime::now_utc(),
        };
        let members = inner.team_members.entry(team_id).or_default();
        members.retain(|m| m.user_id != user_id);
        members.push(member.clone());
        Ok(member)
    }

    async fn remove_team_member(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let members = inner.team_members.entry(team_id).or_default();
        let remaining_admins = members
            .iter()
            .filter(|m| m.role == TeamRole::Admin && m.user_id != user_id)
            .count();
        let is_admin = members
            .iter()
            .any(|m| m.user_id == user_id && m.role == TeamRole::Admin);
        if is_admin && remaining_admins == 0 {
            anyhow::bail!("cannot remove the last admin of a team");
        }
        members.retain(|m| m.user_id != user_id);
        Ok(())
    }

    async fn count_team_admins(&self, team_id: Uuid) -> anyhow::Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .team_members
            .get(&team_id)
            .map(|m| m.iter().filter(|m| m.role == TeamRole::Admin).count() as i64)
            .unwrap_or(0))
    }

    async fn upsert_contact(
        &self,
        user_id: &str,
        display_name: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
        tez_address: &str,
    ) -> anyhow::Result<Contact> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let created_at = inner
            .contacts
            .get(user_id)
            .map(|c| c.created_at)
            .unwrap_or(now);
        let contact = Contact {
            id: user_id.to_string(),
            display_name: display_name.to_string(),
            email: email.map(str::to_string),
            avatar_url: avatar_url.map(str::to_string),
            tez_address: tez_address.to_string(),
            status: "active".to_string(),
            created_at,
            updated_at: now,
        };
        inner.contacts.insert(user_id.to_string(), contact.clone());
        Ok(contact)
    }

    async fn get_contact(&self, user_id: &str) -> anyhow::Result<Option<Contact>> {
        Ok(self.inner.lock().await.contacts.get(user_id).cloned())
    }

    async fn search_contacts(&self, query: &str, limit: i64) -> anyhow::Result<Vec<Contact>> {
        let inner = self.inner.lock().await;
        let needle = query.to_lowercase();
        Ok(inner
            .contacts
            .values()
            .filter(|c| c.display_name.to_lowercase().contains(&needle))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_dm(&self, user_a: &str, user_b: &str) -> anyhow::Result<Option<Conversation>> {
        let inner = self.inner.lock().await;
        let mut pair = [user_a.to_string(), user_b.to_string()];
        pair.sort();
        for (id, conv) in inner.conversations.iter() {
            if conv.conversation_type != ConversationType::Dm {
                continue;
            }
            let members = inner.conversation_members.get(id);
            if let Some(members) = members {
                let mut ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
                ids.sort();
                if ids == pair {
                    return Ok(Some(conv.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn create_conversation(
        &self,
        conversation_type: ConversationType,
        name: Option<&str>,
        created_by: &str,
        member_ids: &[String],
    ) -> anyhow::Result<Conversation> {
        let mut inner = self.inner.lock().await;
        let conv = Conversation {
            id: Uuid::new_v4(),
            conversation_type,
            name: name.map(str::to_string),
            created_by: created_by.to_string(),
        };
        let now = OffsetDateTime::now_utc();
        let members = member_ids
            .iter()
            .map(|user_id| ConversationMember {
                conversation_id: conv.id,
                user_id: user_id.clone(),
                joined_at: now,
                last_read_at: None,
            })
            .collect();
        inner.conversations.insert(conv.id, conv.clone());
        inner.conversation_members.insert(conv.id, members);
        Ok(conv)
    }

    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        Ok(self.inner.lock().await.conversations.get(&id).cloned())
    }

    async fn is_conversation_member(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conversation_members
            .get(&conversation_id)
            .map(|members| members.iter().any(|m| m.user_id == user_id))
            .unwrap_or(false))
    }

    async fn list_conversation_members(&self, conversation_id: Uuid) -> anyhow::Result<Vec<ConversationMember>> {
        Ok(self
            .inner
            .lock()
            .await
            .conversation_members
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_conversations_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Conversation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conversation_members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .filter_map(|(id, _)| inner.conversations.get(id).cloned())
            .collect())
    }

    async fn conversation_last_message(&self, conversation_id: Uuid) -> anyhow::Result<Option<TezSummary>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tez
            .values()
            .filter(|t| t.conversation_id == Some(conversation_id))
            .max_by_key(|t| t.created_at)
            .map(|t| t.to_summary()))
    }

    async fn conversation_unread_count(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<i64> {
        let inner = self.inner.lock().await;
        let last_read_at = inner
            .conversation_members
            .get(&conversation_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
            .and_then(|m| m.last_read_at);
        Ok(inner
            .tez
            .values()
            .filter(|t| {
                t.conversation_id == Some(conversation_id)
                    && t.sender_user_id != user_id
                    && last_read_at.map(|lr| t.created_at > lr).unwrap_or(true)
            })
            .count() as i64)
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.conversation_members.get_mut(&conversation_id) {
            if let Some(member) = members.iter_mut().find(|m| m.user_id == user_id) {
                member.last_read_at = Some(OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }

    async fn admit_tez(&self, admission: TezAdmission) -> anyhow::Result<Tez> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let t = admission.tez;
        let tez = Tez {
            id: t.id,
            team_id: t.team_id,
            conversation_id: t.conversation_id,
            thread_id: t.thread_id,
            parent_tez_id: t.parent_tez_id,
            surface_text: t.surface_text,
            tez_type: t.tez_type,
            urgency: t.urgency,
            action_requested: t.action_requested,
            sender_user_id: t.sender_user_id,
            visibility: t.visibility,
            status: TezStatus::Active,
            created_at: now,
            updated_at: now,
        };
        inner.tez.insert(tez.id, tez.clone());

        let context = admission
            .context
            .into_iter()
            .map(|c| TezContext {
                id: Uuid::new_v4(),
                tez_id: tez.id,
                layer: c.layer,
                content: c.content,
                mime_type: c.mime_type,
                confidence: c.confidence,
                source: c.source,
                derived_from: c.derived_from,
                created_by: c.created_by,
            })
            .collect();
        inner.tez_context.insert(tez.id, context);

        let recipients = admission
            .local_recipients
            .into_iter()
            .map(|user_id| TezRecipient {
                tez_id: tez.id,
                user_id,
                delivered_at: now,
                read_at: None,
                acknowledged_at: None,
            })
            .collect();
        inner.tez_recipients.insert(tez.id, recipients);

        Ok(tez)
    }

    async fn ingest_remote_tez(
        &self,
        tez: Tez,
        context: Vec<NewContext>,
        local_recipients: Vec<String>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let tez_id = tez.id;
        inner.tez.insert(tez_id, tez);

        let context = context
            .into_iter()
            .map(|c| TezContext {
                id: Uuid::new_v4(),
                tez_id,
                layer: c.layer,
                content: c.content,
                mime_type: c.mime_type,
                confidence: c.confidence,
                source: c.source,
                derived_from: c.derived_from,
                created_by: c.created_by,
            })
            .collect();
        inner.tez_context.insert(tez_id, context);

        let recipients = local_recipients
            .into_iter()
            .map(|user_id| TezRecipient {
                tez_id,
                user_id,
                delivered_at: now,
                read_at: None,
                acknowledged_at: None,
            })
            .collect();
        inner.tez_recipients.insert(tez_id, recipients);
        Ok(())
    }

    async fn get_tez(&self, id: Uuid) -> anyhow::Result<Option<Tez>> {
        Ok(self.inner.lock().await.tez.get(&id).cloned())
    }

    async fn get_tez_context(&self, tez_id: Uuid) -> anyhow::Result<Vec<TezContext>> {
        Ok(self
            .inner
            .lock()
            .await
            .tez_context
            .get(&tez_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_tez_recipients(&self, tez_id: Uuid) -> anyhow::Result<Vec<TezRecipient>> {
        Ok(self
            .inner
            .lock()
            .await
            .tez_recipients
            .get(&tez_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_thread(&self, thread_id: Uuid) -> anyhow::Result<Vec<Tez>> {
        let inner = self.inner.lock().await;
        let mut members: Vec<Tez> = inner
            .tez
            .values()
            .filter(|t| t.thread_id == thread_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(members)
    }

    async fn stream_team(&self, team_id: Uuid, limit: i64, before: Option<OffsetDateTime>) -> anyhow::Result<(Vec<Tez>, bool)> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Tez> = inner
            .tez
            .values()
            .filter(|t| t.team_id == Some(team_id) && t.status == TezStatus::Active)
            .filter(|t| before.map(|b| t.created_at < b).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(rows, limit)
    }

    async fn list_conversation_messages(&self, conversation_id: Uuid, limit: i64, before: Option<OffsetDateTime>) -> anyhow::Result<(Vec<Tez>, bool)> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Tez> = inner
            .tez
            .values()
            .filter(|t| t.conversation_id == Some(conversation_id))
            .filter(|t| before.map(|b| t.created_at < b).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(rows, limit)
    }

    async fn team_unread_count(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<i64> {
        let inner = self.inner.lock().await;
        let cursor = inner.team_read_cursor.get(&(team_id, user_id.to_string())).copied();
        Ok(inner
            .tez
            .values()
            .filter(|t| {
                t.team_id == Some(team_id)
                    && t.status == TezStatus::Active
                    && t.sender_user_id != user_id
                    && cursor.map(|c| t.created_at > c).unwrap_or(true)
            })
            .count() as i64)
    }

    async fn mark_team_read(&self, team_id: Uuid, user_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .team_read_cursor
            .insert((team_id, user_id.to_string()), OffsetDateTime::now_utc());
        Ok(())
    }

    async fn get_peer_by_host(&self, host: &str) -> anyhow::Result<Option<Peer>> {
        Ok(self.inner.lock().await.peers.values().find(|p| p.host == host).cloned())
    }

    async fn get_peer_by_server_id(&self, server_id: &str) -> anyhow::Result<Option<Peer>> {
        Ok(self.inner.lock().await.peers.get(server_id).cloned())
    }

    async fn upsert_peer(
        &self,
        host: &str,
        server_id: &str,
        public_key: &str,
        display_name: Option<&str>,
        default_trust: TrustLevel,
    ) -> anyhow::Result<Peer> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.peers.get(server_id).cloned() {
            return Ok(existing);
        }
        let peer = Peer {
            host: host.to_string(),
            server_id: server_id.to_string(),
            public_key: public_key.to_string(),
            display_name: display_name.map(str::to_string),
            trust_level: default_trust,
            first_seen_at: OffsetDateTime::now_utc(),
        };
        inner.peers.insert(server_id.to_string(), peer.clone());
        Ok(peer)
    }

    async fn list_peers(&self) -> anyhow::Result<Vec<Peer>> {
        Ok(self.inner.lock().await.peers.values().cloned().collect())
    }

    async fn set_peer_trust(&self, server_id: &str, trust_level: TrustLevel) -> anyhow::Result<Option<Peer>> {
        let mut inner = self.inner.lock().await;
        if let Some(peer) = inner.peers.get_mut(server_id) {
            peer.trust_level = trust_level;
            return Ok(Some(peer.clone()));
        }
        Ok(None)
    }

    async fn remove_peer(&self, server_id: &str) -> anyhow::Result<bool> {
        Ok(self.inner.lock().await.peers.remove(server_id).is_some())
    }

    async fn enqueue_delivery(&self, target_host: &str, bundle: serde_json::Value) -> anyhow::Result<OutboundDelivery> {
        let mut inner = self.inner.lock().await;
        let delivery = OutboundDelivery {
            id: Uuid::new_v4(),
            target_host: target_host.to_string(),
            bundle,
            status: DeliveryStatus::Queued,
            attempts: 0,
            next_attempt_at: OffsetDateTime::now_utc(),
        };
        inner.outbox.push(delivery.clone());
        Ok(delivery)
    }

    async fn list_outbox(&self) -> anyhow::Result<Vec<OutboundDelivery>> {
        Ok(self.inner.lock().await.outbox.clone())
    }

    async fn record_audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.inner.lock().await.audit.push(entry);
        Ok(())
    }

    async fn list_audit_for_target(&self, target_id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        Ok(self
            .inner
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| e.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn paginate(rows: Vec<Tez>, limit: i64) -> anyhow::Result<(Vec<Tez>, bool)> {
    let limit = limit.max(0) as usize;
    let has_more = rows.len() > limit;
    let mut rows = rows;
    rows.truncate(limit);
    Ok((rows, has_more))
}
