//! Server identity: a persistent Ed25519 keypair and the derived `server_id`.
//!
//! First start generates and saves the keypair under `dataDir/identity/`;
//! subsequent starts load the same identity. `host` comes from configuration
//! and never changes at runtime.

use std::fs;
use std::path::PathBuf;

use ed25519_dalek::SigningKey;
use tracing::info;

use relay_kernel::{derive_server_id, generate_keypair, pubkey_from_signing_key, signing_key_from_hex, signing_key_to_hex};

#[derive(Clone)]
pub struct Identity {
    pub host: String,
    pub server_id: String,
    pub public_key_hex: String,
    pub signing_key: SigningKey,
}

impl Identity {
    /// Load the identity from `data_dir/identity/`, generating and persisting
    /// one on first run.
    pub fn load_or_create(data_dir: &str, host: &str) -> anyhow::Result<Self> {
        let dir = PathBuf::from(data_dir).join("identity");
        let private_path = dir.join("private.key");
        let public_path = dir.join("public.key");

        let signing_key = if private_path.exists() {
            let hex_seed = fs::read_to_string(&private_path)?;
            signing_key_from_hex(hex_seed.trim())?
        } else {
            fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
            }

            let (_, signing_key) = generate_keypair();
            fs::write(&private_path, signing_key_to_hex(&signing_key))?;
            fs::write(&public_path, pubkey_from_signing_key(&signing_key))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))?;
                fs::set_permissions(&public_path, fs::Permissions::from_mode(0o644))?;
            }

            signing_key
        };

        let public_key_hex = pubkey_from_signing_key(&signing_key);
        let pubkey_bytes = hex::decode(&public_key_hex)?;
        let server_id = derive_server_id(&pubkey_bytes);

        info!(server_id = %server_id, public_key = %public_key_hex, "relay identity ready");

        Ok(Self {
            host: host.to_string(),
            server_id,
            public_key_hex,
            signing_key,
        })
    }

    pub fn current(&self) -> (&str, &str, &str) {
        (&self.host, &self.server_id, &self.public_key_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_persists_across_calls() {
        let tmp = std::env::temp_dir().join(format!("relay-identity-test-{}", std::process::id()));
        let dir = tmp.to_str().unwrap();

        let first = Identity::load_or_create(dir, "relay.example.com").unwrap();
        let second = Identity::load_or_create(dir, "relay.example.com").unwrap();

        assert_eq!(first.server_id, second.server_id);
        assert_eq!(first.public_key_hex, second.public_key_hex);
        assert_eq!(first.server_id.len(), 16);

        let _ = fs::remove_dir_all(&tmp);
    }
}
