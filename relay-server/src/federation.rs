//! Recipient partitioning, outbound queueing, and inbound admission (§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::bundle::{self, Bundle};
use crate::config::{config, FederationMode};
use crate::error::AppError;
use crate::identity::Identity;
use crate::signature;
use crate::store::models::{AuditAction, Peer, Tez, TezContext, TrustLevel};
use crate::store::{NewContext, Store};
use crate::trust::TrustRegistry;

/// Split `"<id>@<host>"` addresses into local ids and per-host remote groups.
/// A bare id with no `@` is local. Host comparison is exact-string.
pub fn partition_recipients(addresses: &[String], our_host: &str) -> (Vec<String>, HashMap<String, Vec<String>>) {
    let mut local = Vec::new();
    let mut remote: HashMap<String, Vec<String>> = HashMap::new();
    for addr in addresses {
        match addr.split_once('@') {
            None => local.push(addr.clone()),
            Some((id, host)) if host == our_host => local.push(id.to_string()),
            Some((_, host)) => remote.entry(host.to_string()).or_default().push(addr.clone()),
        }
    }
    (local, remote)
}

pub struct FederationService {
    store: Arc<dyn Store>,
    identity: Identity,
    trust: TrustRegistry,
    audit: Arc<dyn AuditSink>,
}

impl FederationService {
    pub fn new(store: Arc<dyn Store>, identity: Identity, audit: Arc<dyn AuditSink>) -> Self {
        let trust = TrustRegistry::new(store.clone());
        Self {
            store,
            identity,
            trust,
            audit,
        }
    }

    /// Enqueue one OutboundDelivery per remote host targeted by `remote`.
    pub async fn enqueue_outbound(
        &self,
        tez: &Tez,
        context: &[TezContext],
        sender_user_id: &str,
        remote: HashMap<String, Vec<String>>,
    ) -> anyhow::Result<()> {
        if remote.is_empty() {
            return Ok(());
        }
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let from = format!("{}@{}", sender_user_id, self.identity.host);

        for (host, to) in remote {
            let bundle = Bundle::build(
                self.identity.host.clone(),
                tez.clone(),
                context.to_vec(),
                from.clone(),
                to,
                created_at.clone(),
            )
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let value = bundle.to_value().map_err(|e| anyhow::anyhow!(e.to_string()))?;
            self.store.enqueue_delivery(&host, value).await?;
        }
        Ok(())
    }

    pub fn server_info(&self) -> Value {
        let cfg = config();
        bundle::server_info(
            &self.identity.host,
            &self.identity.server_id,
            &self.identity.public_key_hex,
            cfg.federation_enabled,
        )
    }

    /// `POST /federation/verify` — register or refresh a peer's self-description.
    pub async fn verify_peer(&self, host: &str, server_id: &str, public_key: &str) -> anyhow::Result<Peer> {
        let cfg = config();
        self.trust
            .admit(host, server_id, public_key, cfg.federation_mode.clone())
            .await
    }

    /// Full inbound admission pipeline (§4.8). Returns the response body and
    /// whether any recipient went unresolved (207 vs 200).
    pub async fn admit_inbound(
        &self,
        headers: &HeaderMap,
        method: &str,
        path: &str,
        raw_body: &[u8],
    ) -> Result<(Value, bool), AppError> {
        let signature_input = headers
            .get("signature-input")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::MissingSignature("Signature-Input".into()))?;
        let key_id = signature::extract_key_id(signature_input)?;

        let peer = self
            .store
            .get_peer_by_server_id(&key_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::UnknownPeer(key_id.clone()))?;

        signature::verify_request(headers, method, path, &self.identity.host, raw_body, &peer.public_key)?;

        match peer.trust_level {
            TrustLevel::Trusted => {}
            TrustLevel::Pending => return Err(AppError::ServerNotTrusted),
            TrustLevel::Blocked => return Err(AppError::ServerBlocked),
        }

        let raw: Value = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::InvalidBundle(format!("malformed json: {e}")))?;
        let bundle = Bundle::validate(&raw)?;

        let our_host = &self.identity.host;
        let mut local_ids = Vec::new();
        let mut not_found = Vec::new();
        for addr in &bundle.to {
            match addr.split_once('@') {
                Some((id, host)) if host == our_host => {
                    let contact = self.store.get_contact(id).await.map_err(AppError::Internal)?;
                    if contact.is_some() {
                        local_ids.push(id.to_string());
                    } else {
                        not_found.push(addr.clone());
                    }
                }
                _ => {
                    // Not addressed to this relay; nothing to do.
                }
            }
        }

        let context: Vec<NewContext> = bundle
            .context
            .iter()
            .map(|c| NewContext {
                layer: c.layer,
                content: c.content.clone(),
                mime_type: c.mime_type.clone(),
                confidence: c.confidence,
                source: c.source,
                derived_from: c.derived_from.clone(),
                created_by: "system".to_string(),
            })
            .collect();

        self.store
            .ingest_remote_tez(bundle.tez.clone(), context, local_ids.clone())
            .await
            .map_err(AppError::Internal)?;

        self.audit
            .record(
                bundle.tez.team_id,
                &bundle.from,
                AuditAction::TezReceived,
                "tez",
                &bundle.tez.id.to_string(),
                json!({ "senderServer": bundle.sender_server, "to": bundle.to }),
            )
            .await;

        let partial = !not_found.is_empty();
        let body = json!({
            "accepted": true,
            "localTezIds": local_ids,
            "notFound": not_found,
        });
        Ok((body, partial))
    }
}
