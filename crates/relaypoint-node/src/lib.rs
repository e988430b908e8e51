//! Access Point Server
//!
//! A Relaypoint Access Point (AP) is a node in a federated messaging
//! network that:
//! - Issues identity tokens for its own users and signs their public keys
//! - Verifies the signature chain user key → AP key → administrative root
//!   on every inbound request
//! - Coordinates identity recovery, same-AP and cross-AP, releasing sealed
//!   credentials only after the recovery secret verifies
//!
//! ## API Endpoints
//!
//! ### Core Endpoints
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with AP info
//! - `GET /v1/hello` - Unauthenticated probe with verification flags
//! - `POST /v1/tokens/issue` - Register a user and issue an identity token
//! - `POST /v1/messages` - Authenticated mutating route (full chain)
//!
//! ### Recovery Endpoints
//! - `POST /v1/recovery/initiate` - Start a same-AP recovery
//! - `POST /v1/recovery/{id}/respond` - Accept a home AP's response
//! - `POST /v1/recovery/{id}/release` - Release a local account
//! - `GET /v1/recovery/{id}` - Fetch an accepted response
//! - `POST /v1/recovery/cross/initiate` - Open a cross-AP session
//! - `POST /v1/recovery/cross/respond` - Accept a peer's sealed response
//! - `POST /v1/recovery/cross/release` - Release credentials to a peer
//! - `GET /v1/recovery/cross/{temp_user_id}` - Poll a session
//!
//! ### Federation Endpoints
//! - `GET /v1/federation/info` - This AP's identity for peer exchange
//! - `POST /v1/federation/peers` - Register a peer AP key
//! - `GET /v1/federation/peers` - List registered peers
//! - `POST /v1/federation/discover` - Auto-register a peer by URL

pub mod api;
pub mod auth;
pub mod config;
pub mod issuer;
pub mod keys;
pub mod recovery;
pub mod storage;

pub use api::{create_router, AppState};
pub use auth::{AuthContext, AuthFailure, AuthGate, BlacklistGuard, Verification};
pub use config::NodeConfig;
pub use issuer::TokenIssuer;
pub use keys::KeyRegistry;
pub use recovery::{CrossApRecoveryCoordinator, RecoveryCoordinator, RecoveryError};
pub use storage::{MemoryStore, RecoveryStatus, Store};

use std::sync::Arc;

/// Wire up an [`AppState`] from its parts, constructing the gate, issuer
/// and coordinators over the shared store and key registry.
pub fn build_state(
    config: NodeConfig,
    registry: KeyRegistry,
    store: Arc<dyn Store>,
) -> Arc<AppState> {
    let config = Arc::new(config);
    let registry = Arc::new(registry);

    let issuer = TokenIssuer::new(registry.clone(), config.clone());
    let auth_gate = AuthGate::new(
        config.clone(),
        registry.clone(),
        BlacklistGuard::new(store.clone()),
    );
    let recovery = RecoveryCoordinator::new(store.clone(), registry.clone(), config.clone());
    let cross_recovery = CrossApRecoveryCoordinator::new(
        store.clone(),
        registry.clone(),
        config.clone(),
        issuer.clone(),
    );

    Arc::new(AppState {
        config,
        registry,
        store,
        issuer,
        auth_gate,
        recovery,
        cross_recovery,
    })
}
