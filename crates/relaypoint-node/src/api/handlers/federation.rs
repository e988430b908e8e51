//! Federation API handlers
//!
//! Endpoints for AP federation:
//! - Expose this AP's identity for peer registration
//! - Register peer AP public keys for cross-AP signature verification
//! - Auto-discover a peer by URL (requires the `federation` feature)

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::AppState;

/// Information about this AP for discovery
#[derive(Debug, Serialize, Deserialize)]
pub struct ApInfo {
    /// This AP's federation id
    pub ap_id: String,
    /// Base64-encoded AP public key
    pub public_key: String,
    /// Root-issued AP certificate, when provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// API version
    pub api_version: String,
    /// Supported features
    pub features: Vec<String>,
}

/// GET /v1/federation/info
///
/// Returns this AP's identity so peers can register it.
pub async fn federation_info(State(state): State<Arc<AppState>>) -> Json<ApInfo> {
    Json(ApInfo {
        ap_id: state.registry.ap_id().to_string(),
        public_key: state.registry.ap_public_key().to_base64(),
        certificate: state.registry.ap_certificate().map(|c| c.to_wire()),
        name: state.config.ap_name.clone(),
        api_version: "v1".to_string(),
        features: vec![
            "token_issuance".to_string(),
            "recovery".to_string(),
            "cross_ap_recovery".to_string(),
        ],
    })
}

/// Request to register a peer AP
#[derive(Debug, Deserialize)]
pub struct RegisterPeerRequest {
    /// Peer's federation id
    pub ap_id: String,
    /// Base64-encoded peer public key
    pub public_key: String,
}

/// Response from peer registration
#[derive(Debug, Serialize)]
pub struct RegisterPeerResponse {
    /// Whether registration succeeded
    pub registered: bool,
    /// Registered peer id
    pub ap_id: String,
}

/// POST /v1/federation/peers
///
/// Register a peer AP's public key. Cross-AP recovery responses signed by
/// that peer verify against it.
pub async fn register_peer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterPeerRequest>,
) -> Result<Json<RegisterPeerResponse>, ApiError> {
    state
        .registry
        .register_peer_base64(request.ap_id.clone(), &request.public_key)
        .map_err(|e| ApiError::BadRequest(format!("invalid peer key: {}", e)))?;

    info!(ap_id = %request.ap_id, "Registered federation peer");

    Ok(Json(RegisterPeerResponse {
        registered: true,
        ap_id: request.ap_id,
    }))
}

/// Response listing registered peers
#[derive(Debug, Serialize)]
pub struct ListPeersResponse {
    /// This AP's id
    pub local: String,
    /// Registered peer ids
    pub peers: Vec<String>,
}

/// GET /v1/federation/peers
pub async fn list_peers(State(state): State<Arc<AppState>>) -> Json<ListPeersResponse> {
    Json(ListPeersResponse {
        local: state.registry.ap_id().to_string(),
        peers: state.registry.list_peers(),
    })
}

/// Request to discover a peer AP by URL
#[derive(Debug, Deserialize)]
pub struct DiscoverPeerRequest {
    /// Base URL of the peer to discover
    pub url: String,
}

/// POST /v1/federation/discover
///
/// Fetch a peer's federation info and register it, automating the
/// federation handshake with an explicitly supplied URL.
#[cfg(feature = "federation")]
pub async fn discover_peer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DiscoverPeerRequest>,
) -> Result<Json<RegisterPeerResponse>, ApiError> {
    let info_url = format!("{}/v1/federation/info", request.url.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let response = client
        .get(&info_url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to connect to {}: {}", info_url, e)))?;

    if !response.status().is_success() {
        return Err(ApiError::BadRequest(format!(
            "peer returned error: {}",
            response.status()
        )));
    }

    let info: ApInfo = response
        .json()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid response from peer: {}", e)))?;

    register_peer(
        State(state),
        Json(RegisterPeerRequest {
            ap_id: info.ap_id,
            public_key: info.public_key,
        }),
    )
    .await
}

/// POST /v1/federation/discover (stub when the federation feature is off)
#[cfg(not(feature = "federation"))]
pub async fn discover_peer(
    State(_state): State<Arc<AppState>>,
    Json(_request): Json<DiscoverPeerRequest>,
) -> Result<Json<RegisterPeerResponse>, ApiError> {
    Err(ApiError::BadRequest(
        "auto-discovery requires the 'federation' feature; register peers manually".into(),
    ))
}
