//! Bearer-token authentication (§6).
//!
//! Token issuance happens upstream of this system (§9 treats bearer-token
//! issuance as an external collaborator); this module only validates tokens
//! and extracts the acting `userId`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::config;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Extracted from `Authorization: Bearer <token>`. Wraps the verified
/// subject claim.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

pub fn validate_token(token: &str) -> Result<String, AppError> {
    let cfg = config();
    let mut validation = Validation::default();
    validation.set_issuer(&[cfg.jwt_issuer.clone()]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::InvalidToken)?;

    Ok(data.claims.sub)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized)?;

        let user_id = validate_token(token)?;
        Ok(AuthUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(sub: &str) -> String {
        let cfg = config();
        let claims = serde_json::json!({ "sub": sub, "iss": cfg.jwt_issuer, "exp": 4_102_444_800u64 });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(cfg.jwt_secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token_round_trips_subject() {
        let token = issue("alice");
        assert_eq!(validate_token(&token).unwrap(), "alice");
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = validate_token("not-a-jwt").unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }
}
