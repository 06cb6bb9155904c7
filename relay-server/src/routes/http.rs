//! User-facing HTTP API (§6): teams, contacts, conversations, tez.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::messaging::{ContextInput, ShareRequest};
use crate::store::models::{ContextLayer, ContextSource, TeamRole, TezType, Urgency, Visibility};
use crate::store::models::ConversationType;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/teams", post(create_team))
        .route("/teams/:id/members", get(list_team_members).post(add_team_member))
        .route("/teams/:id/members/:user_id", axum::routing::delete(remove_team_member))
        .route("/contacts/register", post(register_contact))
        .route("/contacts/me", get(get_my_contact))
        .route("/contacts/search", get(search_contacts))
        .route("/contacts/:user_id", get(get_contact))
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route("/conversations/:id/messages", get(conversation_messages).post(send_conversation_message))
        .route("/conversations/:id/read", post(mark_conversation_read))
        .route("/unread", get(unread_summary))
        .route("/tez/share", post(share_tez))
        .route("/tez/stream", get(stream_tez))
        .route("/tez/:id/reply", post(reply_tez))
        .route("/tez/:id", get(get_tez))
        .route("/tez/:id/thread", get(tez_thread))
}

async fn health() -> impl axum::response::IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct CreateTeamRequest {
    name: String,
}

async fn create_team(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(req): Json<CreateTeamRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let team = state
        .store
        .create_team(&req.name, &actor.user_id)
        .await
        .map_err(AppError::Internal)?;
    state
        .audit
        .record(
            Some(team.id),
            &actor.user_id,
            crate::store::models::AuditAction::TeamCreated,
            "team",
            &team.id.to_string(),
            json!({ "name": team.name }),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "data": team }))))
}

async fn list_team_members(State(state): State<AppState>, actor: AuthUser, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    state
        .store
        .get_team_member(id, &actor.user_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::Forbidden("not a member of this team".into()))?;
    let members = state.store.list_team_members(id).await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": members })))
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: String,
    #[serde(default)]
    role: Option<TeamRole>,
}

async fn add_team_member(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(team_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let caller = state
        .store
        .get_team_member(team_id, &actor.user_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::Forbidden("not a member of this team".into()))?;
    crate::acl::require_admin(caller.role == TeamRole::Admin, false)?;

    let member = state
        .store
        .add_team_member(team_id, &req.user_id, req.role.unwrap_or(TeamRole::Member))
        .await
        .map_err(AppError::Internal)?;
    state
        .audit
        .record(
            Some(team_id),
            &actor.user_id,
            crate::store::models::AuditAction::TeamMemberAdded,
            "team_member",
            &req.user_id,
            json!({}),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "data": member }))))
}

async fn remove_team_member(
    State(state): State<AppState>,
    actor: AuthUser,
    Path((team_id, user_id)): Path<(Uuid, String)>,
) -> AppResult<Json<serde_json::Value>> {
    if actor.user_id != user_id {
        let caller = state
            .store
            .get_team_member(team_id, &actor.user_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Forbidden("not a member of this team".into()))?;
        crate::acl::require_admin(caller.role == TeamRole::Admin, false)?;
    }
    state
        .store
        .remove_team_member(team_id, &user_id)
        .await
        .map_err(AppError::Internal)?;
    state
        .audit
        .record(
            Some(team_id),
            &actor.user_id,
            crate::store::models::AuditAction::TeamMemberRemoved,
            "team_member",
            &user_id,
            json!({}),
        )
        .await;
    Ok(Json(json!({ "data": { "removed": true } })))
}

#[derive(Deserialize)]
struct RegisterContactRequest {
    display_name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

async fn register_contact(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(req): Json<RegisterContactRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let tez_address = format!("{}@{}", actor.user_id, crate::config::config().relay_host);
    let contact = state
        .store
        .upsert_contact(&actor.user_id, &req.display_name, req.email.as_deref(), req.avatar_url.as_deref(), &tez_address)
        .await
        .map_err(AppError::Internal)?;
    state
        .audit
        .record(
            None,
            &actor.user_id,
            crate::store::models::AuditAction::ContactRegistered,
            "contact",
            &actor.user_id,
            json!({}),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "data": contact }))))
}

async fn get_my_contact(State(state): State<AppState>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    let contact = state
        .store
        .get_contact(&actor.user_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound("contact".into()))?;
    Ok(Json(json!({ "data": contact })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default)]
    limit: Option<i64>,
}

async fn search_contacts(State(state): State<AppState>, _actor: AuthUser, Query(query): Query<SearchQuery>) -> AppResult<Json<serde_json::Value>> {
    if query.q.len() < 2 {
        return Err(AppError::Validation("q must be at least 2 characters".into()));
    }
    let results = state
        .store
        .search_contacts(&query.q, query.limit.unwrap_or(20))
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": results })))
}

async fn get_contact(State(state): State<AppState>, _actor: AuthUser, Path(user_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    let contact = state
        .store
        .get_contact(&user_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound("contact".into()))?;
    Ok(Json(json!({ "data": contact.public() })))
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    #[serde(rename = "type")]
    conversation_type: ConversationType,
    member_ids: Vec<String>,
    #[serde(default)]
    name: Option<String>,
}

async fn create_conversation(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let (conversation, members) = state
        .conversations
        .create(&actor.user_id, req.conversation_type, req.member_ids, req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": { "conversation": conversation, "members": members } }))))
}

async fn list_conversations(State(state): State<AppState>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    let summaries = state.conversations.list(&actor.user_id).await?;
    Ok(Json(json!({ "data": summaries })))
}

#[derive(Deserialize)]
struct ContextDto {
    layer: ContextLayer,
    content: serde_json::Value,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    confidence: Option<u8>,
    #[serde(default)]
    source: Option<ContextSource>,
    #[serde(default)]
    derived_from: Option<String>,
}

impl From<ContextDto> for ContextInput {
    fn from(dto: ContextDto) -> Self {
        ContextInput {
            layer: dto.layer,
            content: dto.content,
            mime_type: dto.mime_type,
            confidence: dto.confidence,
            source: dto.source,
            derived_from: dto.derived_from,
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    before: Option<String>,
}

fn parse_before(before: Option<String>) -> AppResult<Option<OffsetDateTime>> {
    before
        .map(|s| OffsetDateTime::parse(&s, &Rfc3339).map_err(|_| AppError::Validation("before must be RFC3339".into())))
        .transpose()
}

async fn conversation_messages(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let before = parse_before(query.before)?;
    let (messages, has_more) = state.conversations.messages(&actor.user_id, id, query.limit, before).await?;
    Ok(Json(json!({ "data": messages, "meta": { "hasMore": has_more } })))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    surface_text: String,
    #[serde(default)]
    context: Vec<ContextDto>,
}

async fn send_conversation_message(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let context = req.context.into_iter().map(ContextInput::from).collect();
    let tez = state
        .conversations
        .send_message(&actor.user_id, id, req.surface_text, context)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": tez }))))
}

async fn mark_conversation_read(State(state): State<AppState>, actor: AuthUser, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    state.conversations.mark_read(&actor.user_id, id).await?;
    Ok(Json(json!({ "data": { "read": true } })))
}

async fn unread_summary(State(state): State<AppState>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    let conversations = state.conversations.list(&actor.user_id).await?;
    let conversations_unread: i64 = conversations.iter().map(|c| c.unread_count).sum();

    let teams = state.store.list_teams_for_user(&actor.user_id).await.map_err(AppError::Internal)?;
    let mut team_counts = Vec::with_capacity(teams.len());
    let mut teams_unread = 0i64;
    for team in teams {
        let count = state
            .store
            .team_unread_count(team.id, &actor.user_id)
            .await
            .map_err(AppError::Internal)?;
        teams_unread += count;
        team_counts.push(json!({ "teamId": team.id, "unreadCount": count }));
    }

    Ok(Json(json!({
        "data": {
            "teams": team_counts,
            "conversations": conversations_unread,
            "total": teams_unread + conversations_unread,
        }
    })))
}

#[derive(Deserialize)]
struct ShareRequestDto {
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    conversation_id: Option<Uuid>,
    surface_text: String,
    #[serde(rename = "type", default)]
    tez_type: Option<TezType>,
    #[serde(default)]
    urgency: Option<Urgency>,
    #[serde(default)]
    action_requested: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    context: Vec<ContextDto>,
}

fn default_visibility(team_id: Option<Uuid>, conversation_id: Option<Uuid>) -> Visibility {
    if team_id.is_some() {
        Visibility::Team
    } else if conversation_id.is_some() {
        Visibility::Dm
    } else {
        Visibility::Private
    }
}

async fn share_tez(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(req): Json<ShareRequestDto>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let visibility = req.visibility.unwrap_or_else(|| default_visibility(req.team_id, req.conversation_id));
    let tez = state
        .messaging
        .share(
            &actor.user_id,
            ShareRequest {
                team_id: req.team_id,
                conversation_id: req.conversation_id,
                surface_text: req.surface_text,
                tez_type: req.tez_type.unwrap_or(TezType::Note),
                urgency: req.urgency.unwrap_or(Urgency::Normal),
                action_requested: req.action_requested,
                visibility,
                recipients: req.recipients,
                context: req.context.into_iter().map(ContextInput::from).collect(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": tez }))))
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    before: Option<String>,
}

async fn stream_tez(State(state): State<AppState>, actor: AuthUser, Query(query): Query<StreamQuery>) -> AppResult<Json<serde_json::Value>> {
    let team_id = query.team_id.ok_or(AppError::MissingTeam)?;
    let before = parse_before(query.before)?;
    let (messages, has_more) = state.messaging.stream(&actor.user_id, team_id, query.limit, before).await?;
    Ok(Json(json!({ "data": messages, "meta": { "hasMore": has_more } })))
}

#[derive(Deserialize)]
struct ReplyRequestDto {
    surface_text: String,
    #[serde(rename = "type", default)]
    tez_type: Option<TezType>,
    #[serde(default)]
    urgency: Option<Urgency>,
    #[serde(default)]
    action_requested: Option<String>,
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    context: Vec<ContextDto>,
}

async fn reply_tez(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequestDto>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let tez = state
        .messaging
        .reply(
            &actor.user_id,
            id,
            ShareRequest {
                team_id: None,
                conversation_id: None,
                surface_text: req.surface_text,
                tez_type: req.tez_type.unwrap_or(TezType::Note),
                urgency: req.urgency.unwrap_or(Urgency::Normal),
                action_requested: req.action_requested,
                visibility: Visibility::Private,
                recipients: req.recipients,
                context: req.context.into_iter().map(ContextInput::from).collect(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": tez }))))
}

async fn get_tez(State(state): State<AppState>, actor: AuthUser, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    let detail = state.messaging.get(&actor.user_id, id).await?;
    Ok(Json(json!({
        "data": {
            "tez": detail.tez,
            "context": detail.context,
            "recipients": detail.recipients,
        }
    })))
}

async fn tez_thread(State(state): State<AppState>, actor: AuthUser, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    let result = state.messaging.thread(&actor.user_id, id).await?;
    Ok(Json(json!({
        "data": {
            "threadId": result.thread_id,
            "rootTezId": result.root_tez_id,
            "messageCount": result.messages.len(),
            "messages": result.messages,
        }
    })))
}

