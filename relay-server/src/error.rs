//! Unified error handling for the relay HTTP API.
//!
//! A single enum covers every error code named in the external interface,
//! implements `IntoResponse` directly, and renders `{"error": {code, message}}`.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or unverifiable credential")]
    Unauthorized,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("teamId is required")]
    MissingTeam,

    #[error("missing signature header: {0}")]
    MissingSignature(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("digest does not match request body")]
    BodyModified,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer server is not trusted")]
    ServerNotTrusted,

    #[error("peer server is blocked")]
    ServerBlocked,

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MissingTeam => "MISSING_TEAM",
            Self::MissingSignature(_) => "MISSING_SIGNATURE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::BodyModified => "BODY_MODIFIED",
            Self::UnknownPeer(_) => "UNKNOWN_PEER",
            Self::ServerNotTrusted => "SERVER_NOT_TRUSTED",
            Self::ServerBlocked => "SERVER_BLOCKED",
            Self::InvalidBundle(_) => "INVALID_BUNDLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Database(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MissingTeam => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::MissingSignature(_) | Self::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::ServerNotTrusted | Self::ServerBlocked => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BodyModified => StatusCode::UNAUTHORIZED,
            Self::UnknownPeer(_) => StatusCode::FORBIDDEN,
            Self::InvalidBundle(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Success envelope: `{"data": ..., "meta": ...}`.
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { data, meta: None }
    }

    pub fn with_meta(data: T, meta: serde_json::Value) -> Self {
        Self {
            data,
            meta: Some(meta),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(json!({ "data": self.data, "meta": self.meta })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::MissingTeam.code(), "MISSING_TEAM");
        assert_eq!(AppError::MissingTeam.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::InvalidBundle("hash mismatch".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::ServerNotTrusted.status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
