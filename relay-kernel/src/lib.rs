//! # Relay Kernel
//!
//! Pure cryptography for the Tez relay. Mathematically closed, semantically
//! blind: this crate knows nothing about Tez, bundles, or peers — only
//! hashing and Ed25519 signing.
//!
//! ## Features
//! - SHA-256 hashing with domain separation
//! - Ed25519 signing and verification
//! - Deterministic operations only

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from kernel operations.
#[derive(Error, Debug)]
pub enum KernelError {
    /// Invalid hex string.
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid base64 string.
    #[error("Invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Invalid signature.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// Invalid key format.
    #[error("Invalid key format: {0}")]
    InvalidKey(String),
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// SHA-256 of raw bytes, hex-encoded. No domain tag — used for the body
/// digest (§4.2) and bundle hash (§4.3) where the wire format is normatively
/// plain SHA-256 of the input bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of raw bytes, base64-encoded. Used to build the `Digest:` header
/// value `"SHA-256=" + base64(sha256(body))`.
pub fn sha256_base64(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    STANDARD.encode(hasher.finalize())
}

/// Derive a server-id from a public key: first 16 hex chars of
/// sha256(public_key_bytes). Content-addressed, no domain tag, so any
/// peer computing this from the same public key arrives at the same id.
pub fn derive_server_id(pubkey_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pubkey_bytes);
    let full = hex::encode(hasher.finalize());
    full[0..16].to_string()
}

/// Sign data with Ed25519, returning a base64-encoded signature.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> String {
    let signature = signing_key.sign(message);
    STANDARD.encode(signature.to_bytes())
}

/// Verify a base64-encoded Ed25519 signature against a hex public key.
pub fn verify(pubkey_hex: &str, message: &[u8], signature_b64: &str) -> Result<()> {
    let pubkey_bytes = hex::decode(pubkey_hex)?;
    let verifying_key = VerifyingKey::try_from(pubkey_bytes.as_slice())
        .map_err(|e| KernelError::InvalidKey(e.to_string()))?;

    let sig_bytes = STANDARD.decode(signature_b64)?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| KernelError::InvalidKey(e.to_string()))?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| KernelError::SignatureVerification)?;

    Ok(())
}

/// Generate a new signing keypair. Returns (pubkey_hex, signing_key).
pub fn generate_keypair() -> (String, SigningKey) {
    let signing_key = SigningKey::generate(&mut rand::thread_rng());
    let pubkey_hex = hex::encode(signing_key.verifying_key().as_bytes());
    (pubkey_hex, signing_key)
}

/// Get the public key hex from a signing key.
pub fn pubkey_from_signing_key(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().as_bytes())
}

/// Load a signing key from a hex-encoded 32-byte seed.
pub fn signing_key_from_hex(hex_seed: &str) -> Result<SigningKey> {
    let bytes = hex::decode(hex_seed)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KernelError::InvalidKey("signing key must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&arr))
}

/// Hex-encode a signing key's 32-byte seed for persistence.
pub fn signing_key_to_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_deterministic() {
        let data = b"test data";
        let hash1 = sha256_hex(data);
        let hash2 = sha256_hex(data);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_sha256_base64_matches_hex() {
        let data = b"digest me";
        let b64 = sha256_base64(data);
        let decoded = STANDARD.decode(&b64).unwrap();
        assert_eq!(hex::encode(decoded), sha256_hex(data));
    }

    #[test]
    fn test_derive_server_id_length() {
        let (pubkey_hex, _) = generate_keypair();
        let pubkey_bytes = hex::decode(pubkey_hex).unwrap();
        let server_id = derive_server_id(&pubkey_bytes);
        assert_eq!(server_id.len(), 16);
    }

    #[test]
    fn test_derive_server_id_deterministic_and_sensitive() {
        let (pk1, _) = generate_keypair();
        let (pk2, _) = generate_keypair();
        let b1 = hex::decode(&pk1).unwrap();
        let b2 = hex::decode(&pk2).unwrap();
        assert_eq!(derive_server_id(&b1), derive_server_id(&b1));
        assert_ne!(derive_server_id(&b1), derive_server_id(&b2));
    }

    #[test]
    fn test_sign_and_verify() {
        let (pubkey, signing_key) = generate_keypair();
        let message = b"hello world";

        let signature = sign(&signing_key, message);
        assert!(verify(&pubkey, message, &signature).is_ok());
    }

    #[test]
    fn test_verify_wrong_message() {
        let (pubkey, signing_key) = generate_keypair();
        let signature = sign(&signing_key, b"hello world");
        assert!(verify(&pubkey, b"wrong message", &signature).is_err());
    }

    #[test]
    fn test_verify_wrong_key() {
        let (_, signing_key1) = generate_keypair();
        let (pubkey2, _) = generate_keypair();
        let message = b"hello world";
        let signature = sign(&signing_key1, message);
        assert!(verify(&pubkey2, message, &signature).is_err());
    }

    #[test]
    fn test_signing_key_hex_round_trip() {
        let (_, signing_key) = generate_keypair();
        let hex_seed = signing_key_to_hex(&signing_key);
        let loaded = signing_key_from_hex(&hex_seed).unwrap();
        assert_eq!(signing_key.to_bytes(), loaded.to_bytes());
    }
}
