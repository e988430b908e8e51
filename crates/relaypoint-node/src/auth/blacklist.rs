//! Blacklist guard
//!
//! Membership check for banned device-identity nicknames
//! (`username@ap_id`). Entry lifecycle is managed outside the node; the
//! authentication pipeline only ever asks "is this identity banned".

use crate::storage::Store;
use std::sync::Arc;
use tracing::warn;

/// Checks device-identity nicknames against the persisted blacklist
#[derive(Debug, Clone)]
pub struct BlacklistGuard {
    store: Arc<dyn Store>,
}

impl BlacklistGuard {
    /// Create a guard over the node's store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Whether the composite nickname `username@ap_id` is banned.
    ///
    /// A storage failure is logged and reads as not-banned; the pipeline
    /// annotates rather than hard-fails, and the in-process store cannot
    /// error.
    pub async fn is_blacklisted(&self, username: &str, ap_id: &str) -> bool {
        let nickname = format!("{}@{}", username, ap_id);
        match self.store.is_blacklisted(&nickname).await {
            Ok(banned) => banned,
            Err(e) => {
                warn!(nickname = %nickname, error = %e, "Blacklist lookup failed");
                false
            }
        }
    }
}
