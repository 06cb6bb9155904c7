//! Router assembly: user API, server-to-server API, admin API.

pub mod admin;
pub mod federation;
pub mod http;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::audit::AuditSink;
use crate::conversations::Conversations;
use crate::federation::FederationService;
use crate::identity::Identity;
use crate::messaging::Messaging;
use crate::store::Store;
use crate::trust::TrustRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub messaging: Arc<Messaging>,
    pub conversations: Arc<Conversations>,
    pub federation: Arc<FederationService>,
    pub trust: Arc<TrustRegistry>,
    pub audit: Arc<dyn AuditSink>,
    pub identity: Identity,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(http::router())
        .merge(federation::router())
        .merge(admin::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
