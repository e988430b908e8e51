//! Token issuance
//!
//! Builds the tokens this AP hands out: full identity tokens for registered
//! users, and short-lived temporary tokens that let a client drive the
//! recovery handshake before their identity is re-established.

use crate::config::NodeConfig;
use crate::keys::KeyRegistry;
use relaypoint_core::token::{IdentityToken, TokenPayload};
use std::sync::Arc;
use tracing::info;

/// Issues identity and temporary tokens signed with this AP's key
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    registry: Arc<KeyRegistry>,
    config: Arc<NodeConfig>,
}

impl TokenIssuer {
    /// Create a token issuer over this AP's key material
    pub fn new(registry: Arc<KeyRegistry>, config: Arc<NodeConfig>) -> Self {
        Self { registry, config }
    }

    /// Issue a full identity token for a registered user.
    ///
    /// The token carries the user's public key in its payload, this AP's
    /// signature over the canonical payload, and this AP's own root-issued
    /// certificate as the third segment, completing the chain
    /// user key → AP key → administrative root.
    pub fn issue_identity_token(&self, username: &str, public_key: &str) -> String {
        let payload = TokenPayload::identity(self.registry.ap_id(), username, public_key);
        let signature = self.registry.sign(&payload.signing_string());
        let token = IdentityToken {
            payload,
            signature,
            certificate: self.registry.ap_certificate().cloned(),
        };

        info!(username = %username, ap_id = %self.registry.ap_id(), "Issued identity token");
        token.to_wire()
    }

    /// Issue a short-lived temporary token for an in-progress cross-AP
    /// recovery session.
    ///
    /// Temporary tokens carry no usable public key - they skip
    /// content-signature verification and exist purely so the client can
    /// poll the recovery session. Recovery endpoints additionally validate
    /// the recovery-secret hash, and temporary tokens grant no
    /// permanent-user privileges.
    pub fn issue_temporary_token(&self, temp_user_id: &str, original_username: &str) -> String {
        let payload = TokenPayload::temporary(
            self.registry.ap_id(),
            temp_user_id,
            original_username,
            self.config.temporary_token_ttl,
        );
        let signature = self.registry.sign(&payload.signing_string());
        let token = IdentityToken {
            payload,
            signature,
            certificate: None,
        };

        info!(
            temp_user_id = %temp_user_id,
            original_username = %original_username,
            "Issued temporary recovery token"
        );
        token.to_wire()
    }
}
