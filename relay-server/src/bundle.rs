//! Federation envelope (§4.3): construct, canonicalize, hash, and validate.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::store::models::{Tez, TezContext};

pub const PROTOCOL_VERSION: &str = "tez-federation-1";
pub const BUNDLE_TYPE: &str = "federation_delivery";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub protocol_version: String,
    pub bundle_type: String,
    pub sender_server: String,
    pub tez: Tez,
    pub context: Vec<TezContext>,
    pub from: String,
    pub to: Vec<String>,
    pub created_at: String,
    pub bundle_hash: String,
}

const REQUIRED_FIELDS: &[&str] = &[
    "protocol_version",
    "bundle_type",
    "sender_server",
    "tez",
    "context",
    "from",
    "to",
    "created_at",
    "bundle_hash",
];

impl Bundle {
    /// Build a bundle and stamp its `bundle_hash`.
    pub fn build(
        sender_server: String,
        tez: Tez,
        context: Vec<TezContext>,
        from: String,
        to: Vec<String>,
        created_at: String,
    ) -> Result<Self, AppError> {
        let mut bundle = Bundle {
            protocol_version: PROTOCOL_VERSION.to_string(),
            bundle_type: BUNDLE_TYPE.to_string(),
            sender_server,
            tez,
            context,
            from,
            to,
            created_at,
            bundle_hash: String::new(),
        };
        bundle.bundle_hash = bundle.compute_hash()?;
        Ok(bundle)
    }

    fn without_hash_value(&self) -> Result<Value, AppError> {
        let mut value = serde_json::to_value(&self).map_err(|e| AppError::Internal(e.into()))?;
        if let Value::Object(ref mut map) = value {
            map.remove("bundle_hash");
        }
        Ok(value)
    }

    /// `bundle_hash = hex(sha256(canonical_json(bundle_without_hash)))`.
    pub fn compute_hash(&self) -> Result<String, AppError> {
        let value = self.without_hash_value()?;
        relay_atom::atom_hash(&value).map_err(|e| AppError::InvalidBundle(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, AppError> {
        serde_json::to_value(self).map_err(|e| AppError::Internal(e.into()))
    }

    /// Validate a raw inbound bundle. Checks structural shape, required
    /// fields, `protocol_version`, and hash recomputation, in that order;
    /// the error message names the first failing check.
    pub fn validate(raw: &Value) -> Result<Bundle, AppError> {
        let map = raw
            .as_object()
            .ok_or_else(|| AppError::InvalidBundle("bundle must be a JSON object".into()))?;

        for field in REQUIRED_FIELDS {
            if !map.contains_key(*field) {
                return Err(AppError::InvalidBundle(format!("missing field: {field}")));
            }
        }

        let protocol_version = map
            .get("protocol_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if protocol_version != PROTOCOL_VERSION {
            return Err(AppError::InvalidBundle("protocol_version mismatch".into()));
        }

        let bundle_type = map.get("bundle_type").and_then(Value::as_str).unwrap_or_default();
        if bundle_type != BUNDLE_TYPE {
            return Err(AppError::InvalidBundle("bundle_type mismatch".into()));
        }

        let stated_hash = map
            .get("bundle_hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut without_hash = raw.clone();
        if let Value::Object(ref mut m) = without_hash {
            m.remove("bundle_hash");
        }
        let recomputed = relay_atom::atom_hash(&without_hash)
            .map_err(|e| AppError::InvalidBundle(e.to_string()))?;
        if recomputed != stated_hash {
            return Err(AppError::InvalidBundle("hash mismatch".into()));
        }

        serde_json::from_value(raw.clone())
            .map_err(|e| AppError::InvalidBundle(format!("malformed bundle: {e}")))
    }
}

/// `GET /federation/server-info` response shape.
pub fn server_info(host: &str, server_id: &str, public_key: &str, federation_enabled: bool) -> Value {
    json!({
        "host": host,
        "server_id": server_id,
        "public_key": public_key,
        "protocol_version": PROTOCOL_VERSION,
        "federation": {
            "enabled": federation_enabled,
            "inbox": "/federation/inbox",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{TezStatus, TezType, Urgency, Visibility};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn sample_tez() -> Tez {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        Tez {
            id,
            team_id: None,
            conversation_id: None,
            thread_id: id,
            parent_tez_id: None,
            surface_text: "Ship by Friday".into(),
            tez_type: TezType::Note,
            urgency: Urgency::Normal,
            action_requested: None,
            sender_user_id: "alice".into(),
            visibility: Visibility::Private,
            status: TezStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_build_and_validate_round_trip() {
        let bundle = Bundle::build(
            "a.example.com".into(),
            sample_tez(),
            vec![],
            "alice@a.example.com".into(),
            vec!["bob@b.example.com".into()],
            "2026-01-01T00:00:00Z".into(),
        )
        .unwrap();

        let value = bundle.to_value().unwrap();
        let validated = Bundle::validate(&value).unwrap();
        assert_eq!(validated.bundle_hash, bundle.bundle_hash);
    }

    #[test]
    fn test_tampered_hash_rejected() {
        let bundle = Bundle::build(
            "a.example.com".into(),
            sample_tez(),
            vec![],
            "alice@a.example.com".into(),
            vec!["bob@b.example.com".into()],
            "2026-01-01T00:00:00Z".into(),
        )
        .unwrap();

        let mut value = bundle.to_value().unwrap();
        value["tez"]["surface_text"] = json!("Ship by friday");

        let err = Bundle::validate(&value).unwrap_err();
        assert!(matches!(err, AppError::InvalidBundle(msg) if msg == "hash mismatch"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let bundle = Bundle::build(
            "a.example.com".into(),
            sample_tez(),
            vec![],
            "alice@a.example.com".into(),
            vec!["bob@b.example.com".into()],
            "2026-01-01T00:00:00Z".into(),
        )
        .unwrap();

        let mut value = bundle.to_value().unwrap();
        value.as_object_mut().unwrap().remove("to");

        let err = Bundle::validate(&value).unwrap_err();
        assert!(matches!(err, AppError::InvalidBundle(msg) if msg.starts_with("missing field")));
    }

    #[test]
    fn test_protocol_version_mismatch_rejected() {
        let bundle = Bundle::build(
            "a.example.com".into(),
            sample_tez(),
            vec![],
            "alice@a.example.com".into(),
            vec!["bob@b.example.com".into()],
            "2026-01-01T00:00:00Z".into(),
        )
        .unwrap();

        let mut value = bundle.to_value().unwrap();
        value["protocol_version"] = json!("some-other-protocol");

        let err = Bundle::validate(&value).unwrap_err();
        assert!(matches!(err, AppError::InvalidBundle(msg) if msg == "protocol_version mismatch"));
    }
}
