//! Same-AP recovery handlers
//!
//! These routes are self-authenticating: initiation carries the requester's
//! signature under their ephemeral key, responses carry the home AP's
//! signature, and release is gated on the recovery-secret hash stored with
//! the request. The auth middleware still annotates every request; the
//! coordinator's own checks are what admit or reject it.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::recovery::local::InitiateRecovery;
use crate::storage::RecoveryStatus;

/// Request to initiate a same-AP recovery
#[derive(Debug, Deserialize)]
pub struct InitiateRecoveryRequest {
    /// Username being recovered
    pub username: String,
    /// Home AP of the account
    pub source_ap_id: String,
    /// AP the request is made at; defaults to this node
    #[serde(default)]
    pub requesting_ap_id: Option<String>,
    /// Ephemeral public key the response will be sealed under
    pub ephemeral_public_key: String,
    /// Salted hash of the presented recovery secret
    #[serde(default)]
    pub recovery_secret_hash: Option<String>,
    /// The requesting AP's signature over the canonical request payload.
    /// Absent when the client calls its own AP directly - this node is the
    /// requesting AP and signs the relayed request itself.
    #[serde(default)]
    pub requester_signature: Option<String>,
}

/// Response from recovery initiation
#[derive(Debug, Serialize)]
pub struct InitiateRecoveryResponse {
    /// Id to respond to and poll on
    pub request_id: String,
    /// Stored lifecycle status
    pub status: RecoveryStatus,
    /// Request expiry
    pub expires_at: String,
}

/// Initiate a same-AP recovery
///
/// POST /v1/recovery/initiate
pub async fn initiate_recovery(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiateRecoveryRequest>,
) -> Result<Json<InitiateRecoveryResponse>, ApiError> {
    let requesting_ap_id = request
        .requesting_ap_id
        .unwrap_or_else(|| state.registry.ap_id().to_string());

    let mut params = InitiateRecovery {
        username: request.username,
        source_ap_id: request.source_ap_id,
        requesting_ap_id,
        ephemeral_public_key: request.ephemeral_public_key,
        recovery_secret_hash: request.recovery_secret_hash,
        requester_signature: request.requester_signature.unwrap_or_default(),
    };

    // Direct client calls carry no relay signature; this node is the
    // requesting AP and signs the request itself
    if params.requester_signature.is_empty() && params.requesting_ap_id == state.registry.ap_id() {
        params.requester_signature = state
            .registry
            .sign(&crate::recovery::local::initiate_signing_string(&params));
    }

    let stored = state.recovery.initiate(params).await?;

    Ok(Json(InitiateRecoveryResponse {
        request_id: stored.id,
        status: stored.status,
        expires_at: stored.expires_at.to_rfc3339(),
    }))
}

/// Request carrying a home AP's recovery response
#[derive(Debug, Deserialize)]
pub struct RespondRecoveryRequest {
    /// Credentials sealed under the request's ephemeral public key
    pub encrypted_user_data: String,
    /// AP producing the response
    pub source_ap_id: String,
    /// Producing AP's signature over the response payload
    pub source_ap_signature: String,
}

/// Summary of an accepted recovery response
#[derive(Debug, Serialize)]
pub struct RecoveryResponseSummary {
    /// Request id the response answers
    pub request_id: String,
    /// Lifecycle status after acceptance
    pub status: RecoveryStatus,
    /// Sealed credential payload
    pub encrypted_user_data: String,
    /// AP that produced the response
    pub source_ap_id: String,
    /// Producing AP's signature
    pub source_ap_signature: String,
}

/// Accept a recovery response from the AP that owns the account
///
/// POST /v1/recovery/{id}/respond
pub async fn respond_recovery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RespondRecoveryRequest>,
) -> Result<Json<RecoveryResponseSummary>, ApiError> {
    let response = state
        .recovery
        .respond(
            &id,
            request.encrypted_user_data,
            request.source_ap_id,
            request.source_ap_signature,
        )
        .await?;

    Ok(Json(RecoveryResponseSummary {
        request_id: response.request_id,
        status: RecoveryStatus::Completed,
        encrypted_user_data: response.encrypted_user_data,
        source_ap_id: response.source_ap_id,
        source_ap_signature: response.source_ap_signature,
    }))
}

/// Release this AP's own account for a pending request, gated on the
/// recovery-secret hash stored with the request
///
/// POST /v1/recovery/{id}/release
pub async fn release_recovery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RecoveryResponseSummary>, ApiError> {
    let response = state.recovery.release(&id).await?;

    Ok(Json(RecoveryResponseSummary {
        request_id: response.request_id,
        status: RecoveryStatus::Completed,
        encrypted_user_data: response.encrypted_user_data,
        source_ap_id: response.source_ap_id,
        source_ap_signature: response.source_ap_signature,
    }))
}

/// Fetch the response for a recovery request
///
/// GET /v1/recovery/{id}
pub async fn fetch_recovery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RecoveryResponseSummary>, ApiError> {
    let response = state.recovery.fetch(&id).await?;

    Ok(Json(RecoveryResponseSummary {
        request_id: response.request_id,
        status: RecoveryStatus::Completed,
        encrypted_user_data: response.encrypted_user_data,
        source_ap_id: response.source_ap_id,
        source_ap_signature: response.source_ap_signature,
    }))
}
