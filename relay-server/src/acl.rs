//! Access control (§4.5): a single pure predicate, no hidden state.
//!
//! Precedence: sender may always access their own Tez, then team
//! membership, then conversation membership; anything else is denied.

use crate::error::AppError;
use crate::store::models::Tez;
use crate::store::Store;

/// Dispatches on scope (`teamId`/`conversationId`), not the `visibility`
/// field: visibility is a display hint the caller sets independently of
/// scope, so it cannot be trusted to pick the access predicate.
pub async fn may_access(store: &dyn Store, actor_user_id: &str, tez: &Tez) -> Result<(), AppError> {
    if tez.sender_user_id == actor_user_id {
        return Ok(());
    }

    if let Some(team_id) = tez.team_id {
        let member = store
            .get_team_member(team_id, actor_user_id)
            .await
            .map_err(AppError::Internal)?;
        if member.is_some() {
            return Ok(());
        }
    } else if let Some(conversation_id) = tez.conversation_id {
        let is_member = store
            .is_conversation_member(conversation_id, actor_user_id)
            .await
            .map_err(AppError::Internal)?;
        if is_member {
            return Ok(());
        }
    }

    Err(AppError::Forbidden("not authorized to access this tez".into()))
}

/// Admin-only operations (federation trust management, etc.): either a team
/// admin for team-scoped resources, or a configured relay admin.
pub fn require_admin(is_team_admin: bool, is_relay_admin: bool) -> Result<(), AppError> {
    if is_team_admin || is_relay_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin privileges required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;
    use crate::store::models::{TezStatus, TezType, Urgency, Visibility};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn sample_tez(visibility: Visibility, team_id: Option<Uuid>, conversation_id: Option<Uuid>) -> Tez {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        Tez {
            id,
            team_id,
            conversation_id,
            thread_id: id,
            parent_tez_id: None,
            surface_text: "hello".into(),
            tez_type: TezType::Note,
            urgency: Urgency::Normal,
            action_requested: None,
            sender_user_id: "alice".into(),
            visibility,
            status: TezStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_sender_always_allowed() {
        let store = MemStore::new();
        let tez = sample_tez(Visibility::Private, None, None);
        assert!(may_access(&store, "alice", &tez).await.is_ok());
    }

    #[tokio::test]
    async fn test_team_member_allowed() {
        let store = MemStore::new();
        let team = store.create_team("eng", "alice").await.unwrap();
        store
            .add_team_member(team.id, "bob", crate::store::models::TeamRole::Member)
            .await
            .unwrap();
        let tez = sample_tez(Visibility::Team, Some(team.id), None);
        assert!(may_access(&store, "bob", &tez).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_team_member_denied() {
        let store = MemStore::new();
        let team = store.create_team("eng", "alice").await.unwrap();
        let tez = sample_tez(Visibility::Team, Some(team.id), None);
        let err = may_access(&store, "mallory", &tez).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_private_tez_denied_to_others() {
        let store = MemStore::new();
        let tez = sample_tez(Visibility::Private, None, None);
        let err = may_access(&store, "bob", &tez).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_scope_dispatch_ignores_visibility_field() {
        let store = MemStore::new();
        let team = store.create_team("eng", "alice").await.unwrap();
        store
            .add_team_member(team.id, "bob", crate::store::models::TeamRole::Member)
            .await
            .unwrap();
        // team_id set but visibility says Private: scope wins, member is allowed.
        let tez = sample_tez(Visibility::Private, Some(team.id), None);
        assert!(may_access(&store, "bob", &tez).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_scope_denied_regardless_of_visibility() {
        let store = MemStore::new();
        // visibility says Team but there is no team_id or conversation_id to check against.
        let tez = sample_tez(Visibility::Team, None, None);
        let err = may_access(&store, "bob", &tez).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(true, false).is_ok());
        assert!(require_admin(false, true).is_ok());
        assert!(require_admin(false, false).is_err());
    }
}
