//! # Relay Configuration
//!
//! Centralized configuration, loaded once from the environment.
//! Eliminates scattered `env::var()` calls across the codebase.

use std::env;
use std::sync::OnceLock;

static CONFIG: OnceLock<RelayConfig> = OnceLock::new();

/// Get the global relay configuration.
pub fn config() -> &'static RelayConfig {
    CONFIG.get_or_init(RelayConfig::from_env)
}

#[derive(Debug, Clone)]
pub enum FederationMode {
    Allowlist,
    Open,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub relay_host: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub max_tez_size_bytes: usize,
    pub max_context_items: usize,
    pub max_recipients: usize,
    pub federation_enabled: bool,
    pub federation_mode: FederationMode,
    pub data_dir: String,
    pub admin_user_ids: Vec<String>,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            relay_host: env::var("RELAY_HOST").unwrap_or_else(|_| "localhost".into()),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into()),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "tez-relay".into()),
            max_tez_size_bytes: env::var("MAX_TEZ_SIZE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024),
            max_context_items: env::var("MAX_CONTEXT_ITEMS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            max_recipients: env::var("MAX_RECIPIENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            federation_enabled: env::var("FEDERATION_ENABLED")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
            federation_mode: match env::var("FEDERATION_MODE").as_deref() {
                Ok("open") => FederationMode::Open,
                _ => FederationMode::Allowlist,
            },
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()),
            admin_user_ids: env::var("ADMIN_USER_IDS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::from_env();
        assert_eq!(config.max_context_items, 50);
        assert_eq!(config.max_recipients, 100);
        assert_eq!(config.max_tez_size_bytes, 1024 * 1024);
    }

    #[test]
    fn test_is_admin() {
        let mut config = RelayConfig::from_env();
        config.admin_user_ids = vec!["alice".into()];
        assert!(config.is_admin("alice"));
        assert!(!config.is_admin("bob"));
    }
}
