//! # Tez Relay Server
//!
//! HTTP API for team messaging with rich context layers, plus a
//! server-to-server federation surface for delivering Tez across relays.
//!
//! User-facing routes:
//! - GET  /health
//! - POST /teams, GET/POST /teams/:id/members, DELETE /teams/:id/members/:user_id
//! - POST /contacts/register, GET /contacts/me, GET /contacts/search, GET /contacts/:user_id
//! - GET/POST /conversations, GET/POST /conversations/:id/messages, POST /conversations/:id/read
//! - GET  /unread
//! - POST /tez/share, GET /tez/stream, POST /tez/:id/reply, GET /tez/:id, GET /tez/:id/thread
//!
//! Federation routes:
//! - POST /federation/inbox
//! - GET  /federation/server-info
//! - POST /federation/verify
//!
//! Admin routes:
//! - GET/PATCH /admin/federation/servers, GET/PATCH/DELETE /admin/federation/servers/:server_id
//! - GET  /admin/federation/outbox

mod acl;
mod audit;
mod auth;
mod bundle;
mod config;
mod conversations;
mod error;
mod federation;
mod identity;
mod messaging;
mod routes;
mod signature;
mod store;
mod trust;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use audit::StoreAuditSink;
use config::config;
use conversations::Conversations;
use federation::FederationService;
use identity::Identity;
use messaging::Messaging;
use routes::AppState;
use store::db::PgStore;
use store::Store;
use trust::TrustRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_server=info".parse().unwrap()),
        )
        .init();

    let cfg = config();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://relay@localhost:5432/relay_dev".to_string());

    info!("connecting to postgres");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await?;
    info!("postgres connected");

    let identity = Identity::load_or_create(&cfg.data_dir, &cfg.relay_host)?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let audit: Arc<dyn audit::AuditSink> = Arc::new(StoreAuditSink::new(store.clone()));

    let federation = Arc::new(FederationService::new(store.clone(), identity.clone(), audit.clone()));
    let trust = Arc::new(TrustRegistry::new(store.clone()));
    let messaging = Arc::new(Messaging::new(store.clone(), audit.clone(), federation.clone()));
    let conversations = Arc::new(Conversations::new(store.clone(), messaging.clone()));

    let state = AppState {
        store,
        messaging,
        conversations,
        federation,
        trust,
        audit,
        identity: identity.clone(),
    };

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!(server_id = %identity.server_id, host = %identity.host, "tez relay starting");
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// End-to-end scenarios (§8) exercised against `MemStore`, wiring the same
/// services `main` assembles but without a live Postgres or HTTP listener.
#[cfg(test)]
mod scenario_tests {
    use std::sync::Arc;

    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::audit::test_support::RecordingAuditSink;
    use crate::audit::AuditSink;
    use crate::bundle::Bundle;
    use crate::conversations::Conversations;
    use crate::federation::FederationService;
    use crate::identity::Identity;
    use crate::messaging::{Messaging, ShareRequest};
    use crate::signature;
    use crate::store::memory::MemStore;
    use crate::store::models::{ConversationType, TezType, TrustLevel, Urgency, Visibility};
    use crate::store::Store;

    fn test_identity(host: &str) -> Identity {
        let (_, signing_key) = relay_kernel::generate_keypair();
        let public_key_hex = relay_kernel::pubkey_from_signing_key(&signing_key);
        let pubkey_bytes = hex::decode(&public_key_hex).unwrap();
        let server_id = relay_kernel::derive_server_id(&pubkey_bytes);
        Identity {
            host: host.to_string(),
            server_id,
            public_key_hex,
            signing_key,
        }
    }

    fn bare_share(surface_text: &str, recipients: Vec<String>) -> ShareRequest {
        ShareRequest {
            team_id: None,
            conversation_id: None,
            surface_text: surface_text.to_string(),
            tez_type: TezType::Note,
            urgency: Urgency::Normal,
            action_requested: None,
            visibility: Visibility::Team,
            recipients,
            context: vec![],
        }
    }

    /// Scenario 1: team share + read.
    #[tokio::test]
    async fn test_team_share_and_read() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let audit_sink: Arc<dyn AuditSink> = audit.clone();
        let identity = test_identity("a.example.com");
        let federation = Arc::new(FederationService::new(store.clone(), identity, audit_sink.clone()));
        let messaging = Messaging::new(store.clone(), audit_sink, federation);

        let team = store.create_team("Eng", "admin").await.unwrap();
        store.add_team_member(team.id, "member", crate::store::models::TeamRole::Member).await.unwrap();
        audit
            .record(Some(team.id), "admin", crate::store::models::AuditAction::TeamCreated, "team", &team.id.to_string(), serde_json::json!({}))
            .await;

        let mut req = bare_share("Ship by Friday", vec![]);
        req.team_id = Some(team.id);
        let tez = messaging.share("admin", req).await.unwrap();

        let detail = messaging.get("member", tez.id).await.unwrap();
        assert_eq!(detail.tez.surface_text, "Ship by Friday");
        assert!(detail.context.is_empty());
        assert!(detail.recipients.is_empty());

        let entries = audit.entries.lock().await;
        let actions: Vec<_> = entries.iter().map(|e| e.2).collect();
        assert!(actions.contains(&crate::store::models::AuditAction::TeamCreated));
        assert!(actions.contains(&crate::store::models::AuditAction::TezShared));
        assert!(actions.contains(&crate::store::models::AuditAction::TezRead));
    }

    /// Scenario 2: threaded reply.
    #[tokio::test]
    async fn test_threaded_reply() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let audit: Arc<dyn AuditSink> = Arc::new(RecordingAuditSink::default());
        let identity = test_identity("a.example.com");
        let federation = Arc::new(FederationService::new(store.clone(), identity, audit.clone()));
        let messaging = Messaging::new(store.clone(), audit.clone(), federation);

        let team = store.create_team("Eng", "admin").await.unwrap();
        store.add_team_member(team.id, "a", crate::store::models::TeamRole::Member).await.unwrap();
        store.add_team_member(team.id, "b", crate::store::models::TeamRole::Member).await.unwrap();

        let mut root_req = bare_share("Root", vec![]);
        root_req.team_id = Some(team.id);
        let root = messaging.share("admin", root_req).await.unwrap();

        let first = messaging.reply("a", root.id, bare_share("First", vec![])).await.unwrap();
        let deep = messaging.reply("b", first.id, bare_share("Deep", vec![])).await.unwrap();

        assert_eq!(deep.parent_tez_id, Some(first.id));
        assert_eq!(deep.thread_id, root.id);
        assert_eq!(first.thread_id, root.id);
        assert_eq!(root.thread_id, root.id);

        let thread = messaging.thread("a", root.id).await.unwrap();
        assert_eq!(thread.root_tez_id, root.id);
        assert_eq!(thread.messages.len(), 3);
        let ordered: Vec<&str> = thread.messages.iter().map(|t| t.surface_text.as_str()).collect();
        assert_eq!(ordered, vec!["Root", "First", "Deep"]);
    }

    /// Scenario 3: DM isolation.
    #[tokio::test]
    async fn test_dm_isolation() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let audit: Arc<dyn AuditSink> = Arc::new(RecordingAuditSink::default());
        let identity = test_identity("a.example.com");
        let federation = Arc::new(FederationService::new(store.clone(), identity, audit.clone()));
        let messaging = Arc::new(Messaging::new(store.clone(), audit.clone(), federation));
        let conversations = Conversations::new(store.clone(), messaging.clone());

        let (conv, _) = conversations
            .create("alice", ConversationType::Dm, vec!["bob".to_string()], None)
            .await
            .unwrap();

        let tez = conversations
            .send_message("alice", conv.id, "hey bob".to_string(), vec![])
            .await
            .unwrap();

        let as_bob = messaging.get("bob", tez.id).await;
        assert!(as_bob.is_ok());

        let as_outsider = messaging.get("outsider", tez.id).await;
        assert!(matches!(as_outsider, Err(crate::error::AppError::Forbidden(_))));

        let reply_attempt = messaging.reply("outsider", tez.id, bare_share("butting in", vec![])).await;
        assert!(matches!(reply_attempt, Err(crate::error::AppError::Forbidden(_))));
    }

    /// Scenario 4 & 5: federation happy path and tampering.
    #[tokio::test]
    async fn test_federation_happy_path_and_tampering() {
        let store_b: Arc<dyn Store> = Arc::new(MemStore::new());
        let identity_a = test_identity("a.example.com");
        let identity_b = test_identity("b.example.com");
        let audit_b: Arc<dyn AuditSink> = Arc::new(RecordingAuditSink::default());
        let federation_b = FederationService::new(store_b.clone(), identity_b.clone(), audit_b.clone());

        store_b
            .upsert_peer("a.example.com", &identity_a.server_id, &identity_a.public_key_hex, None, TrustLevel::Trusted)
            .await
            .unwrap();
        store_b
            .upsert_contact("bob", "Bob", None, None, "bob@b.example.com")
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc().format(&Rfc3339).unwrap();
        let tez = sample_tez("alice");
        let bundle = Bundle::build(
            "a.example.com".to_string(),
            tez.clone(),
            vec![],
            "alice@a.example.com".to_string(),
            vec!["bob@b.example.com".to_string(), "ghost@b.example.com".to_string()],
            now,
        )
        .unwrap();
        let body = serde_json::to_vec(&bundle.to_value().unwrap()).unwrap();

        let signed = signature::sign_request(&identity_a, "POST", "/federation/inbox", "b.example.com", &body);
        let headers = headers_from(&signed);

        let (response, partial) = federation_b.admit_inbound(&headers, "POST", "/federation/inbox", &body).await.unwrap();
        assert!(partial);
        assert_eq!(response["localTezIds"], serde_json::json!(["bob"]));
        assert_eq!(response["notFound"], serde_json::json!(["ghost@b.example.com"]));

        let stored = store_b.get_tez(tez.id).await.unwrap().unwrap();
        assert_eq!(stored.surface_text, "Ship by Friday");

        // Tampering: mutate surfaceText after signing, re-sign the tampered body.
        let mut tampered_value = bundle.to_value().unwrap();
        tampered_value["tez"]["surface_text"] = serde_json::json!("Ship by friday");
        let tampered_body = serde_json::to_vec(&tampered_value).unwrap();
        let tampered_signed = signature::sign_request(&identity_a, "POST", "/federation/inbox", "b.example.com", &tampered_body);
        let tampered_headers = headers_from(&tampered_signed);

        let err = federation_b
            .admit_inbound(&tampered_headers, "POST", "/federation/inbox", &tampered_body)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::InvalidBundle(msg) if msg == "hash mismatch"));
    }

    /// Scenario 6: federation untrusted peer, then trusted after admin action.
    #[tokio::test]
    async fn test_federation_untrusted_then_trusted() {
        let store_b: Arc<dyn Store> = Arc::new(MemStore::new());
        let identity_a = test_identity("a.example.com");
        let identity_b = test_identity("b.example.com");
        let audit_b: Arc<dyn AuditSink> = Arc::new(RecordingAuditSink::default());
        let federation_b = FederationService::new(store_b.clone(), identity_b.clone(), audit_b);

        store_b
            .upsert_peer("a.example.com", &identity_a.server_id, &identity_a.public_key_hex, None, TrustLevel::Pending)
            .await
            .unwrap();
        store_b
            .upsert_contact("bob", "Bob", None, None, "bob@b.example.com")
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc().format(&Rfc3339).unwrap();
        let bundle = Bundle::build(
            "a.example.com".to_string(),
            sample_tez("alice"),
            vec![],
            "alice@a.example.com".to_string(),
            vec!["bob@b.example.com".to_string()],
            now,
        )
        .unwrap();
        let body = serde_json::to_vec(&bundle.to_value().unwrap()).unwrap();
        let signed = signature::sign_request(&identity_a, "POST", "/federation/inbox", "b.example.com", &body);
        let headers = headers_from(&signed);

        let err = federation_b
            .admit_inbound(&headers, "POST", "/federation/inbox", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::ServerNotTrusted));

        store_b.set_peer_trust(&identity_a.server_id, TrustLevel::Trusted).await.unwrap();

        let (response, partial) = federation_b.admit_inbound(&headers, "POST", "/federation/inbox", &body).await.unwrap();
        assert!(!partial);
        assert_eq!(response["localTezIds"], serde_json::json!(["bob"]));
    }

    fn sample_tez(sender: &str) -> crate::store::models::Tez {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        crate::store::models::Tez {
            id,
            team_id: None,
            conversation_id: None,
            thread_id: id,
            parent_tez_id: None,
            surface_text: "Ship by Friday".into(),
            tez_type: TezType::Note,
            urgency: Urgency::Normal,
            action_requested: None,
            sender_user_id: sender.to_string(),
            visibility: Visibility::Private,
            status: crate::store::models::TezStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn headers_from(out: &signature::OutboundHeaders) -> axum::http::HeaderMap {
        use axum::http::{HeaderName, HeaderValue};
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(HeaderName::from_static("date"), HeaderValue::from_str(&out.date).unwrap());
        headers.insert(HeaderName::from_static("digest"), HeaderValue::from_str(&out.digest).unwrap());
        headers.insert(HeaderName::from_static("signature"), HeaderValue::from_str(&out.signature).unwrap());
        headers.insert(
            HeaderName::from_static("signature-input"),
            HeaderValue::from_str(&out.signature_input).unwrap(),
        );
        headers
    }
}
