//! Access Point configuration
//!
//! All knobs the authentication and recovery pipelines branch on live here,
//! loaded once at startup and passed by `Arc`. Nothing in this struct is
//! runtime-mutable: the public-route allowlist and the administrative root
//! key are process-wide constants for the life of the node.

use chrono::Duration;

/// Access Point configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This AP's federation-wide identifier
    pub ap_id: String,

    /// Human-readable name of this AP
    pub ap_name: Option<String>,

    /// Public URL of this AP (for federation peer exchange)
    pub public_url: Option<String>,

    /// Paths that bypass authentication entirely
    pub public_routes: Vec<String>,

    /// Liveness probe path, allowed through without credentials and flagged
    /// so handlers can branch on "no credentials yet"
    pub probe_path: String,

    /// TTL of a same-AP recovery request
    pub recovery_ttl: Duration,

    /// TTL of a cross-AP recovery session
    pub cross_recovery_ttl: Duration,

    /// TTL of a temporary recovery-handshake token
    pub temporary_token_ttl: Duration,

    /// Failed recovery attempts before an account is locked
    pub max_recovery_attempts: u32,

    /// How long a recovery lock lasts. Expired locks are treated as
    /// unlocked at read time; rows are never swept.
    pub lockout_duration: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ap_id: "relaypoint".into(),
            ap_name: None,
            public_url: None,
            public_routes: vec![
                "/health".into(),
                "/ready".into(),
                "/v1/tokens/issue".into(),
                "/v1/federation/info".into(),
                "/v1/recovery/initiate".into(),
                "/v1/recovery/cross/initiate".into(),
            ],
            probe_path: "/v1/hello".into(),
            recovery_ttl: Duration::minutes(30),
            cross_recovery_ttl: Duration::minutes(30),
            temporary_token_ttl: Duration::minutes(10),
            max_recovery_attempts: 5,
            lockout_duration: Duration::hours(1),
        }
    }
}

impl NodeConfig {
    /// Whether a request path bypasses authentication
    pub fn is_public_route(&self, path: &str) -> bool {
        self.public_routes.iter().any(|p| p == path)
    }
}
