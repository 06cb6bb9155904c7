//! Peer registry and trust-state transitions (§4.4).
//!
//! `pending -> trusted|blocked`, `trusted -> blocked`, `blocked -> trusted`,
//! any state `-> removed`. Inbound federation admission requires `trusted`.

use std::sync::Arc;

use crate::config::FederationMode;
use crate::error::AppError;
use crate::store::models::{Peer, TrustLevel};
use crate::store::Store;

pub struct TrustRegistry {
    store: Arc<dyn Store>,
}

impl TrustRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve a peer for an inbound request, registering it on first contact.
    /// In `allowlist` mode a newly seen peer starts `pending` and is rejected;
    /// in `open` mode a newly seen peer starts `trusted`.
    pub async fn admit(
        &self,
        host: &str,
        server_id: &str,
        public_key: &str,
        mode: FederationMode,
    ) -> anyhow::Result<Peer> {
        let peer = match self.store.get_peer_by_server_id(server_id).await? {
            Some(peer) => peer,
            None => {
                let default_trust = match mode {
                    FederationMode::Open => TrustLevel::Trusted,
                    FederationMode::Allowlist => TrustLevel::Pending,
                };
                self.store
                    .upsert_peer(host, server_id, public_key, None, default_trust)
                    .await?
            }
        };
        Ok(peer)
    }

    pub async fn require_trusted(&self, peer: &Peer) -> Result<(), AppError> {
        match peer.trust_level {
            TrustLevel::Trusted => Ok(()),
            TrustLevel::Pending => Err(AppError::ServerNotTrusted),
            TrustLevel::Blocked => Err(AppError::ServerBlocked),
        }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Peer>> {
        self.store.list_peers().await
    }

    pub async fn set_trust(&self, server_id: &str, trust_level: TrustLevel) -> anyhow::Result<Option<Peer>> {
        self.store.set_peer_trust(server_id, trust_level).await
    }

    pub async fn remove(&self, server_id: &str) -> anyhow::Result<bool> {
        self.store.remove_peer(server_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;

    fn registry() -> TrustRegistry {
        TrustRegistry::new(Arc::new(MemStore::new()))
    }

    #[tokio::test]
    async fn test_allowlist_admission_starts_pending() {
        let reg = registry();
        let peer = reg
            .admit("b.example.com", "srv-b", "pubkey", FederationMode::Allowlist)
            .await
            .unwrap();
        assert_eq!(peer.trust_level, TrustLevel::Pending);
        assert!(reg.require_trusted(&peer).await.is_err());
    }

    #[tokio::test]
    async fn test_open_admission_starts_trusted() {
        let reg = registry();
        let peer = reg
            .admit("b.example.com", "srv-b", "pubkey", FederationMode::Open)
            .await
            .unwrap();
        assert_eq!(peer.trust_level, TrustLevel::Trusted);
        assert!(reg.require_trusted(&peer).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_to_trusted_transition() {
        let reg = registry();
        reg.admit("b.example.com", "srv-b", "pubkey", FederationMode::Allowlist)
            .await
            .unwrap();
        let peer = reg.set_trust("srv-b", TrustLevel::Trusted).await.unwrap().unwrap();
        assert!(reg.require_trusted(&peer).await.is_ok());
    }

    #[tokio::test]
    async fn test_blocked_peer_rejected() {
        let reg = registry();
        reg.admit("b.example.com", "srv-b", "pubkey", FederationMode::Open)
            .await
            .unwrap();
        let peer = reg.set_trust("srv-b", TrustLevel::Blocked).await.unwrap().unwrap();
        let err = reg.require_trusted(&peer).await.unwrap_err();
        assert!(matches!(err, AppError::ServerBlocked));
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let reg = registry();
        reg.admit("b.example.com", "srv-b", "pubkey", FederationMode::Open)
            .await
            .unwrap();
        assert!(reg.remove("srv-b").await.unwrap());
        assert!(reg.list().await.unwrap().is_empty());
    }
}
