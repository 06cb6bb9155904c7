//! HTTP signatures for the server-to-server API (§4.2).
//!
//! Canonical signing string: `@method`, `@path`, `host`, `date`, `digest`,
//! each rendered `"<token>: <value>"` and joined by single newlines. The
//! signature is Ed25519 over that byte string, base64-encoded.

use axum::http::HeaderMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::identity::Identity;

const DATE_SKEW: time::Duration = time::Duration::minutes(5);

pub struct OutboundHeaders {
    pub date: String,
    pub digest: String,
    pub signature: String,
    pub signature_input: String,
}

fn canonical_signing_string(method: &str, path: &str, host: &str, date: &str, digest: &str) -> String {
    format!(
        "@method: {}\n@path: {}\nhost: {}\ndate: {}\ndigest: {}",
        method.to_uppercase(),
        path,
        host,
        date,
        digest
    )
}

/// Build the signed-request headers for an outbound federation POST.
pub fn sign_request(identity: &Identity, method: &str, path: &str, target_host: &str, body: &[u8]) -> OutboundHeaders {
    let digest = format!("SHA-256={}", relay_kernel::sha256_base64(body));
    let date = OffsetDateTime::now_utc().format(&Rfc3339).expect("rfc3339 format");

    let signing_string = canonical_signing_string(method, path, target_host, &date, &digest);
    let signature = relay_kernel::sign(&identity.signing_key, signing_string.as_bytes());

    let signature_input = format!(
        "(\"@method\" \"@path\" \"host\" \"date\" \"digest\");keyid=\"{}\"",
        identity.server_id
    );

    OutboundHeaders {
        date,
        digest,
        signature,
        signature_input,
    }
}

/// Pull the `keyId` out of a `Signature-Input` header value, without
/// verifying anything yet — callers use this to resolve the peer before
/// checking trust and validating the signature itself.
pub fn extract_key_id(signature_input: &str) -> Result<String, AppError> {
    let marker = "keyid=\"";
    let start = signature_input
        .find(marker)
        .ok_or_else(|| AppError::MissingSignature("Signature-Input".into()))?
        + marker.len();
    let rest = &signature_input[start..];
    let end = rest
        .find('"')
        .ok_or_else(|| AppError::MissingSignature("Signature-Input".into()))?;
    Ok(rest[..end].to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::MissingSignature(name.to_string()))?
        .to_str()
        .map_err(|_| AppError::MissingSignature(name.to_string()))
}

/// Verify an inbound signed request. `pubkey_hex` must already have been
/// resolved by the caller via the peer's `keyId` and trust state checked.
pub fn verify_request(
    headers: &HeaderMap,
    method: &str,
    path: &str,
    host: &str,
    body: &[u8],
    pubkey_hex: &str,
) -> Result<(), AppError> {
    let date = header_str(headers, "date")?;
    let digest_header = header_str(headers, "digest")?;
    let signature = header_str(headers, "signature")?;

    let expected_digest = format!("SHA-256={}", relay_kernel::sha256_base64(body));
    if digest_header != expected_digest {
        return Err(AppError::BodyModified);
    }

    check_date_skew(date)?;

    let signing_string = canonical_signing_string(method, path, host, date, digest_header);
    relay_kernel::verify(pubkey_hex, signing_string.as_bytes(), signature)
        .map_err(|_| AppError::InvalidSignature)
}

fn check_date_skew(date: &str) -> Result<(), AppError> {
    let parsed = OffsetDateTime::parse(date, &Rfc3339)
        .map_err(|_| AppError::InvalidSignature)?;
    let now = OffsetDateTime::now_utc();
    let skew = if parsed > now { parsed - now } else { now - parsed };
    if skew > DATE_SKEW {
        return Err(AppError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn test_identity() -> Identity {
        let (_, signing_key) = relay_kernel::generate_keypair();
        let public_key_hex = relay_kernel::pubkey_from_signing_key(&signing_key);
        let pubkey_bytes = hex::decode(&public_key_hex).unwrap();
        let server_id = relay_kernel::derive_server_id(&pubkey_bytes);
        Identity {
            host: "a.example.com".into(),
            server_id,
            public_key_hex,
            signing_key,
        }
    }

    fn headers_from(out: &OutboundHeaders) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("date"), HeaderValue::from_str(&out.date).unwrap());
        headers.insert(HeaderName::from_static("digest"), HeaderValue::from_str(&out.digest).unwrap());
        headers.insert(HeaderName::from_static("signature"), HeaderValue::from_str(&out.signature).unwrap());
        headers
    }

    #[test]
    fn test_sign_then_verify_round_trip() {
        let identity = test_identity();
        let body = br#"{"hello":"world"}"#;
        let out = sign_request(&identity, "POST", "/federation/inbox", "b.example.com", body);
        let headers = headers_from(&out);

        assert!(verify_request(&headers, "POST", "/federation/inbox", "b.example.com", body, &identity.public_key_hex).is_ok());
    }

    #[test]
    fn test_body_tamper_detected() {
        let identity = test_identity();
        let body = br#"{"hello":"world"}"#;
        let out = sign_request(&identity, "POST", "/federation/inbox", "b.example.com", body);
        let headers = headers_from(&out);

        let tampered = br#"{"hello":"WORLD"}"#;
        let result = verify_request(&headers, "POST", "/federation/inbox", "b.example.com", tampered, &identity.public_key_hex);
        assert!(matches!(result, Err(AppError::BodyModified)));
    }

    #[test]
    fn test_path_tamper_detected() {
        let identity = test_identity();
        let body = br#"{"hello":"world"}"#;
        let out = sign_request(&identity, "POST", "/federation/inbox", "b.example.com", body);
        let headers = headers_from(&out);

        let result = verify_request(&headers, "POST", "/federation/other", "b.example.com", body, &identity.public_key_hex);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn test_missing_header() {
        let headers = HeaderMap::new();
        let result = verify_request(&headers, "POST", "/x", "b.example.com", b"{}", "deadbeef");
        assert!(matches!(result, Err(AppError::MissingSignature(_))));
    }

    #[test]
    fn test_extract_key_id() {
        let input = "(\"@method\" \"@path\" \"host\" \"date\" \"digest\");keyid=\"abcdef0123456789\"";
        assert_eq!(extract_key_id(input).unwrap(), "abcdef0123456789");
    }

    #[test]
    fn test_date_skew_rejected() {
        let identity = test_identity();
        let body = b"{}";
        let stale_date = (OffsetDateTime::now_utc() - time::Duration::minutes(10))
            .format(&Rfc3339)
            .unwrap();
        let digest = format!("SHA-256={}", relay_kernel::sha256_base64(body));
        let signing_string = canonical_signing_string("POST", "/federation/inbox", "b.example.com", &stale_date, &digest);
        let signature = relay_kernel::sign(&identity.signing_key, signing_string.as_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("date"), HeaderValue::from_str(&stale_date).unwrap());
        headers.insert(HeaderName::from_static("digest"), HeaderValue::from_str(&digest).unwrap());
        headers.insert(HeaderName::from_static("signature"), HeaderValue::from_str(&signature).unwrap());

        let result = verify_request(&headers, "POST", "/federation/inbox", "b.example.com", body, &identity.public_key_hex);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }
}
