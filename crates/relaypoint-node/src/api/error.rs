//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthFailure;
use crate::recovery::RecoveryError;
use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::Gone(msg) => (StatusCode::GONE, "EXPIRED", msg.clone()),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<RecoveryError> for ApiError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::InvalidSignature(msg) => ApiError::Unauthorized(msg),
            RecoveryError::RequestExpired => ApiError::Gone("recovery request expired".into()),
            RecoveryError::AlreadyResponded => {
                ApiError::Conflict("recovery request already has a response".into())
            }
            RecoveryError::AlreadyCompleted => {
                ApiError::Conflict("recovery session already completed".into())
            }
            RecoveryError::NotFound(id) => ApiError::NotFound(id),
            RecoveryError::SecretMismatch => {
                ApiError::Unauthorized("recovery secret does not match".into())
            }
            RecoveryError::AccountLocked(reason) => {
                ApiError::Forbidden(format!("account locked: {}", reason))
            }
            RecoveryError::UnknownPeerAp(ap) => {
                ApiError::Unauthorized(format!("unknown peer AP: {}", ap))
            }
            RecoveryError::Sealing(msg) => ApiError::Internal(msg),
            RecoveryError::Storage(e) => ApiError::from(e),
        }
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::MissingToken => ApiError::Unauthorized("missing token".into()),
            AuthFailure::MalformedToken(msg) => {
                ApiError::BadRequest(format!("malformed token: {}", msg))
            }
            AuthFailure::TokenVerificationFailed(msg) => ApiError::Unauthorized(msg),
            AuthFailure::ContentSignatureFailed(msg) => ApiError::Unauthorized(msg),
            AuthFailure::CertificateKeyMismatch => {
                ApiError::Unauthorized("device certificate key mismatch".into())
            }
            AuthFailure::Blacklisted(nickname) => {
                ApiError::Forbidden(format!("device identity blacklisted: {}", nickname))
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => ApiError::NotFound(id),
            StorageError::AlreadyExists(id) => ApiError::Conflict(id),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<relaypoint_core::IdentityError> for ApiError {
    fn from(err: relaypoint_core::IdentityError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
