//! Cross-AP recovery handlers
//!
//! Initiation and polling serve the requesting client; respond and release
//! serve the peer AP on the other side of the exchange. Polling accepts the
//! temporary token issued at initiation and requires it to name the session
//! being polled.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::auth::{AuthContext, AuthPolicy};
use crate::recovery::cross_ap::{CredentialClaim, InitiateCrossRecovery};
use crate::storage::RecoveryStatus;

/// Request to open a cross-AP recovery session
#[derive(Debug, Deserialize)]
pub struct InitiateCrossRequest {
    /// Claimed home AP holding the account
    pub destination_ap_id: String,
    /// Claimed real username at the destination AP
    pub username: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: String,
    /// Ephemeral public key the response will be sealed under
    pub ephemeral_public_key: String,
}

/// Response from opening a session
#[derive(Debug, Serialize)]
pub struct InitiateCrossResponse {
    /// Temporary user id identifying the session
    pub temp_user_id: String,
    /// Temporary token for polling before recovery completes
    pub temporary_token: String,
    /// Session expiry
    pub expires_at: String,
}

/// Open a cross-AP recovery session
///
/// POST /v1/recovery/cross/initiate
pub async fn initiate_cross_recovery(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiateCrossRequest>,
) -> Result<Json<InitiateCrossResponse>, ApiError> {
    let ticket = state
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: state.registry.ap_id().to_string(),
            destination_ap_id: request.destination_ap_id,
            username: request.username,
            recovery_secret_hash: request.recovery_secret_hash,
            ephemeral_public_key: request.ephemeral_public_key,
        })
        .await?;

    Ok(Json(InitiateCrossResponse {
        temp_user_id: ticket.temp_user_id,
        temporary_token: ticket.temporary_token,
        expires_at: ticket.expires_at.to_rfc3339(),
    }))
}

/// Inbound response from a destination AP
#[derive(Debug, Deserialize)]
pub struct SubmitCrossResponseRequest {
    /// Session the response answers
    pub temp_user_id: String,
    /// Credentials sealed under the session's ephemeral public key
    pub encrypted_user_data: String,
    /// AP that released the credentials
    pub source_ap_id: String,
    /// Releasing AP's signature over the response payload
    pub source_ap_signature: String,
}

/// Acknowledgement of an accepted response
#[derive(Debug, Serialize)]
pub struct SubmitCrossResponseAck {
    /// Session id
    pub temp_user_id: String,
    /// Lifecycle status after acceptance
    pub status: RecoveryStatus,
}

/// Accept a destination AP's response for a session
///
/// POST /v1/recovery/cross/respond
pub async fn submit_cross_response(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitCrossResponseRequest>,
) -> Result<Json<SubmitCrossResponseAck>, ApiError> {
    state
        .cross_recovery
        .submit_response(
            &request.temp_user_id,
            request.encrypted_user_data,
            request.source_ap_id,
            request.source_ap_signature,
        )
        .await?;

    Ok(Json(SubmitCrossResponseAck {
        temp_user_id: request.temp_user_id,
        status: RecoveryStatus::Completed,
    }))
}

/// Observed session state
#[derive(Debug, Serialize)]
pub struct PollCrossResponse {
    /// Session id
    pub temp_user_id: String,
    /// Observed status (lazy expiry applied)
    pub status: RecoveryStatus,
    /// Sealed credential payload, present once COMPLETED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_data: Option<String>,
}

/// Poll a session's status
///
/// GET /v1/recovery/cross/{temp_user_id}
///
/// Requires the temporary token issued at initiation (or a full identity
/// token); a temporary token only opens the session it was minted for.
pub async fn poll_cross_recovery(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(temp_user_id): Path<String>,
) -> Result<Json<PollCrossResponse>, ApiError> {
    crate::auth::AllowTemporary.evaluate(&ctx).map_err(ApiError::from)?;

    if let Some(temp) = &ctx.temporary {
        if temp.temp_user_id != temp_user_id {
            return Err(ApiError::Forbidden(
                "temporary token does not match this session".into(),
            ));
        }
    }

    let outcome = state.cross_recovery.poll(&temp_user_id).await?;

    Ok(Json(PollCrossResponse {
        temp_user_id,
        status: outcome.status,
        response_data: outcome.response_data,
    }))
}

/// A peer AP's claim for one of this node's accounts
#[derive(Debug, Deserialize)]
pub struct ReleaseCredentialsRequest {
    /// Session id at the claiming AP, echoed for correlation
    pub temp_user_id: String,
    /// Username whose credentials are claimed
    pub username: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: String,
    /// Ephemeral public key to seal the credentials under
    pub ephemeral_public_key: String,
    /// AP making the claim
    pub requesting_ap_id: String,
}

/// The sealed release returned to the claiming AP
#[derive(Debug, Serialize)]
pub struct ReleaseCredentialsResponse {
    /// Session id at the claiming AP
    pub temp_user_id: String,
    /// Credentials sealed under the claim's ephemeral public key
    pub encrypted_user_data: String,
    /// This AP's id
    pub source_ap_id: String,
    /// This AP's signature over the response payload
    pub source_ap_signature: String,
}

/// Release an account's sealed credentials to a claiming peer AP
///
/// POST /v1/recovery/cross/release
pub async fn release_credentials(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReleaseCredentialsRequest>,
) -> Result<Json<ReleaseCredentialsResponse>, ApiError> {
    let response = state
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: request.temp_user_id,
            username: request.username,
            recovery_secret_hash: request.recovery_secret_hash,
            ephemeral_public_key: request.ephemeral_public_key,
            requesting_ap_id: request.requesting_ap_id,
        })
        .await?;

    Ok(Json(ReleaseCredentialsResponse {
        temp_user_id: response.temp_user_id,
        encrypted_user_data: response.encrypted_user_data,
        source_ap_id: response.source_ap_id,
        source_ap_signature: response.source_ap_signature,
    }))
}
