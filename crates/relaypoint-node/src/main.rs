//! Access Point Server Binary
//!
//! Runs the Relaypoint AP HTTP server.

use std::env;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use relaypoint_core::{KeyPair, PublicKey};
use relaypoint_node::{build_state, create_router, KeyRegistry, MemoryStore, NodeConfig};

#[tokio::main]
async fn main() {
    // Initialize logging
    let log_level = env::var("RELAYPOINT_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Configuration
    let port: u16 = env::var("RELAYPOINT_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .expect("RELAYPOINT_PORT must be a valid port number");

    let ap_id = env::var("RELAYPOINT_AP_ID")
        .unwrap_or_else(|_| format!("relaypoint-{}", uuid::Uuid::new_v4()));

    let config = NodeConfig {
        ap_id: ap_id.clone(),
        ap_name: env::var("RELAYPOINT_NAME").ok(),
        public_url: env::var("RELAYPOINT_PUBLIC_URL").ok(),
        ..NodeConfig::default()
    };

    // Key material: load a provisioned signing key and root public key when
    // supplied, otherwise generate a development identity with a local root
    let registry = match (
        env::var("RELAYPOINT_SIGNING_KEY").ok(),
        env::var("RELAYPOINT_ROOT_PUBLIC_KEY").ok(),
    ) {
        (Some(signing_key), root_key) => {
            let key_pair = KeyPair::from_base64(&signing_key)
                .expect("RELAYPOINT_SIGNING_KEY must be a base64 Ed25519 signing key");
            let root = root_key.map(|k| {
                PublicKey::from_base64(&k)
                    .expect("RELAYPOINT_ROOT_PUBLIC_KEY must be a base64 Ed25519 public key")
            });
            let certificate = env::var("RELAYPOINT_AP_CERTIFICATE")
                .ok()
                .map(|c| {
                    relaypoint_core::ApCertificate::parse(&c)
                        .expect("RELAYPOINT_AP_CERTIFICATE must be a valid certificate")
                });
            KeyRegistry::new(&ap_id, key_pair, certificate, root)
        }
        (None, _) => KeyRegistry::generate(&ap_id),
    };

    // Storage
    let store = Arc::new(MemoryStore::new());

    info!(
        ap_id = %registry.ap_id(),
        port = port,
        "Starting Access Point server"
    );

    // Application state and router
    let state = build_state(config, registry, store);
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Access Point listening");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
