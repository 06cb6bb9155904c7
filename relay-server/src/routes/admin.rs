//! Admin federation endpoints (§6): trust management, outbox inspection.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::config::config;
use crate::error::{AppError, AppResult};
use crate::store::models::TrustLevel;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/federation/servers",
            get(list_servers).patch(patch_server_bare),
        )
        .route(
            "/admin/federation/servers/:server_id",
            get(get_server).patch(patch_server).delete(delete_server),
        )
        .route("/admin/federation/outbox", get(list_outbox))
}

fn require_admin(actor: &AuthUser) -> AppResult<()> {
    crate::acl::require_admin(false, config().is_admin(&actor.user_id))
}

async fn list_servers(State(state): State<AppState>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    require_admin(&actor)?;
    let peers = state.trust.list().await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": peers })))
}

async fn get_server(State(state): State<AppState>, actor: AuthUser, Path(server_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    require_admin(&actor)?;
    let peers = state.trust.list().await.map_err(AppError::Internal)?;
    let peer = peers
        .into_iter()
        .find(|p| p.server_id == server_id)
        .ok_or_else(|| AppError::NotFound("peer".into()))?;
    Ok(Json(json!({ "data": peer })))
}

#[derive(Deserialize)]
struct PatchTrustRequest {
    trust_level: TrustLevel,
}

async fn patch_server_bare() -> AppResult<Json<serde_json::Value>> {
    Err(AppError::Validation("server_id is required".into()))
}

async fn patch_server(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(server_id): Path<String>,
    Json(req): Json<PatchTrustRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&actor)?;
    let peer = state
        .trust
        .set_trust(&server_id, req.trust_level)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound("peer".into()))?;

    let action = match req.trust_level {
        TrustLevel::Trusted => crate::store::models::AuditAction::PeerTrusted,
        TrustLevel::Blocked => crate::store::models::AuditAction::PeerBlocked,
        TrustLevel::Pending => crate::store::models::AuditAction::PeerTrusted,
    };
    state
        .audit
        .record(None, &actor.user_id, action, "peer", &server_id, json!({}))
        .await;

    Ok(Json(json!({ "data": peer })))
}

async fn delete_server(State(state): State<AppState>, actor: AuthUser, Path(server_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    require_admin(&actor)?;
    let removed = state.trust.remove(&server_id).await.map_err(AppError::Internal)?;
    if !removed {
        return Err(AppError::NotFound("peer".into()));
    }
    state
        .audit
        .record(
            None,
            &actor.user_id,
            crate::store::models::AuditAction::PeerRemoved,
            "peer",
            &server_id,
            json!({}),
        )
        .await;
    Ok(Json(json!({ "data": { "removed": true } })))
}

async fn list_outbox(State(state): State<AppState>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    require_admin(&actor)?;
    let outbox = state.store.list_outbox().await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": outbox })))
}
