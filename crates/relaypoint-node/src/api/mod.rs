//! API module for the Access Point server

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthContext, AuthGate};
use crate::config::NodeConfig;
use crate::issuer::TokenIssuer;
use crate::keys::KeyRegistry;
use crate::recovery::{CrossApRecoveryCoordinator, RecoveryCoordinator};
use crate::storage::Store;

/// Application state shared across handlers
pub struct AppState {
    /// Node configuration, loaded once at startup
    pub config: Arc<NodeConfig>,
    /// Key registry for cryptographic operations
    pub registry: Arc<KeyRegistry>,
    /// Persistent node state
    pub store: Arc<dyn Store>,
    /// Token issuance
    pub issuer: TokenIssuer,
    /// Per-request authentication pipeline
    pub auth_gate: AuthGate,
    /// Same-AP recovery coordination
    pub recovery: RecoveryCoordinator,
    /// Cross-AP recovery coordination
    pub cross_recovery: CrossApRecoveryCoordinator,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub ap_id: String,
    pub peer_count: usize,
}

/// Probe response: lets a client with no credentials yet confirm the node
/// is reachable and see whether its token, if any, verified
#[derive(Serialize)]
pub struct HelloResponse {
    pub ap_id: String,
    pub authenticated: bool,
    pub probe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        ap_id: state.registry.ap_id().to_string(),
        peer_count: state.registry.peer_count(),
    })
}

/// Unauthenticated probe endpoint
///
/// GET /v1/hello
pub async fn hello(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Json<HelloResponse> {
    Json(HelloResponse {
        ap_id: state.registry.ap_id().to_string(),
        authenticated: ctx.token_verified,
        probe: ctx.probe,
        username: ctx.username().map(String::from),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration for browser-based clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/v1/hello", get(hello))
        // Token issuance
        .route("/v1/tokens/issue", post(handlers::issue_token))
        // Same-AP recovery
        .route("/v1/recovery/initiate", post(handlers::initiate_recovery))
        .route("/v1/recovery/{id}/respond", post(handlers::respond_recovery))
        .route("/v1/recovery/{id}/release", post(handlers::release_recovery))
        .route("/v1/recovery/{id}", get(handlers::fetch_recovery))
        // Cross-AP recovery
        .route(
            "/v1/recovery/cross/initiate",
            post(handlers::initiate_cross_recovery),
        )
        .route(
            "/v1/recovery/cross/respond",
            post(handlers::submit_cross_response),
        )
        .route(
            "/v1/recovery/cross/release",
            post(handlers::release_credentials),
        )
        .route(
            "/v1/recovery/cross/{temp_user_id}",
            get(handlers::poll_cross_recovery),
        )
        // Messaging (demonstrates the full verification chain)
        .route("/v1/messages", post(handlers::post_message))
        // Federation endpoints
        .route("/v1/federation/info", get(handlers::federation_info))
        .route("/v1/federation/peers", post(handlers::register_peer))
        .route("/v1/federation/peers", get(handlers::list_peers))
        .route("/v1/federation/discover", post(handlers::discover_peer))
        // Middleware: authentication first, then tracing and CORS
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::authenticate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
