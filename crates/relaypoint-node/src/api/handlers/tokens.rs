//! Identity-token issuance handler
//!
//! The registration-time entry point: records the user and hands back the
//! three-segment identity token chaining their key to this AP and the
//! administrative root. Account management beyond this is outside the
//! node's scope.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::recovery::account;
use crate::storage::User;

/// Request to issue an identity token
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    /// Username to register the token under
    pub username: String,

    /// The user's base64 Ed25519 public key
    pub public_key: String,

    /// Optional recovery secret to enroll alongside registration
    #[serde(default)]
    pub recovery_secret: Option<String>,

    /// Optional opaque credential bundle to escrow for recovery
    #[serde(default)]
    pub escrowed_credentials: Option<String>,
}

/// Response from token issuance
#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    /// The issued identity token
    pub token: String,

    /// Issuing AP
    pub ap_id: String,

    /// Registered username
    pub username: String,

    /// Salt for the enrolled recovery secret; the client needs it to
    /// reproduce the secret hash during recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_salt: Option<String>,
}

/// Issue an identity token for a (newly registered) user
///
/// POST /v1/tokens/issue
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, ApiError> {
    if request.username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }

    // Usernames are unique per AP; a re-registration must present the same
    // public key
    let mut user = match state.store.get_user(&request.username).await? {
        Some(existing) if existing.public_key != request.public_key => {
            return Err(ApiError::Conflict(format!(
                "username '{}' is already registered",
                request.username
            )));
        }
        Some(existing) => existing,
        None => User::new(&request.username, &request.public_key),
    };

    let recovery_salt = request
        .recovery_secret
        .as_deref()
        .map(|secret| account::enroll_recovery_secret(&mut user, secret, Utc::now()));

    if let Some(credentials) = request.escrowed_credentials {
        user.escrowed_credentials = Some(credentials);
    }

    state.store.put_user(user).await?;

    let token = state
        .issuer
        .issue_identity_token(&request.username, &request.public_key);

    info!(
        username = %request.username,
        enrolled_recovery = recovery_salt.is_some(),
        "Registered user and issued identity token"
    );

    Ok(Json(IssueTokenResponse {
        token,
        ap_id: state.registry.ap_id().to_string(),
        username: request.username,
        recovery_salt,
    }))
}
