//! Server-to-server HTTP API (§6): inbox, server-info, verify.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/federation/inbox", post(inbox))
        .route("/federation/server-info", get(server_info))
        .route("/federation/verify", post(verify))
}

async fn inbox(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let (body_value, partial) = state
        .federation
        .admit_inbound(&headers, "POST", "/federation/inbox", &body)
        .await?;
    let status = if partial { StatusCode::MULTI_STATUS } else { StatusCode::OK };
    Ok((status, Json(body_value)))
}

async fn server_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.federation.server_info())
}

#[derive(Deserialize)]
struct VerifyRequest {
    host: String,
    server_id: String,
    public_key: String,
}

async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> AppResult<Json<serde_json::Value>> {
    let peer = state
        .federation
        .verify_peer(&req.host, &req.server_id, &req.public_key)
        .await
        .map_err(crate::error::AppError::Internal)?;
    let status = match peer.trust_level {
        crate::store::models::TrustLevel::Trusted => "trusted",
        _ => "pending",
    };
    Ok(Json(json!({ "status": status })))
}
