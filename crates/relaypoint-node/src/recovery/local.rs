//! Same-AP recovery coordination
//!
//! A user who still knows their recovery secret asks their AP to release
//! their credentials, sealed under an ephemeral key the requester just
//! generated. The request/response pair lives in the store; the response is
//! written at most once, guarded by the PENDING precondition.

use crate::config::NodeConfig;
use crate::keys::KeyRegistry;
use crate::recovery::{account, RecoveryError};
use crate::storage::{RecoveryRequest, RecoveryResponse, RecoveryStatus, Store};
use chrono::Utc;
use relaypoint_core::crypto;
use relaypoint_core::encoding;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters for initiating a same-AP recovery
#[derive(Debug, Clone)]
pub struct InitiateRecovery {
    /// Username being recovered
    pub username: String,
    /// Home AP of the account
    pub source_ap_id: String,
    /// AP the request is made at (may equal the source)
    pub requesting_ap_id: String,
    /// Ephemeral public key the response will be sealed under
    pub ephemeral_public_key: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: Option<String>,
    /// The requesting AP's signature over [`initiate_signing_string`]
    pub requester_signature: String,
}

/// The canonical string a recovery-initiation signature covers.
///
/// The requesting AP signs the request it relays for the locked-out user,
/// binding the claimed identity to the ephemeral key the response will be
/// sealed under. The user authenticates through the recovery-secret hash,
/// not a signature - they may hold no usable signing key at all.
pub fn initiate_signing_string(params: &InitiateRecovery) -> String {
    encoding::canonicalize(&json!({
        "username": params.username,
        "source_ap_id": params.source_ap_id,
        "requesting_ap_id": params.requesting_ap_id,
        "ephemeral_public_key": params.ephemeral_public_key,
        "recovery_secret_hash": params.recovery_secret_hash,
    }))
}

/// The canonical string a recovery-response signature covers
pub fn response_signing_string(
    request_id: &str,
    encrypted_user_data: &str,
    target_ap_id: &str,
    source_ap_id: &str,
) -> String {
    encoding::canonicalize(&json!({
        "request_id": request_id,
        "encrypted_user_data": encrypted_user_data,
        "target_ap_id": target_ap_id,
        "source_ap_id": source_ap_id,
    }))
}

/// Coordinates same-AP recovery requests
#[derive(Debug, Clone)]
pub struct RecoveryCoordinator {
    store: Arc<dyn Store>,
    registry: Arc<KeyRegistry>,
    config: Arc<NodeConfig>,
}

impl RecoveryCoordinator {
    /// Create a coordinator over the node's store and keys
    pub fn new(store: Arc<dyn Store>, registry: Arc<KeyRegistry>, config: Arc<NodeConfig>) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Start a recovery: verify the requesting AP's signature and persist
    /// a PENDING request with the configured TTL.
    pub async fn initiate(&self, params: InitiateRecovery) -> Result<RecoveryRequest, RecoveryError> {
        let key = self
            .registry
            .get_peer(&params.requesting_ap_id)
            .ok_or_else(|| RecoveryError::UnknownPeerAp(params.requesting_ap_id.clone()))?;

        let canonical = initiate_signing_string(&params);
        if !key.verify(&canonical, &params.requester_signature) {
            warn!(username = %params.username, "Recovery initiation signature rejected");
            return Err(RecoveryError::InvalidSignature(
                "requester signature does not match request".into(),
            ));
        }

        let now = Utc::now();
        let request = RecoveryRequest {
            id: Uuid::new_v4().to_string(),
            username: params.username,
            source_ap_id: params.source_ap_id,
            requesting_ap_id: params.requesting_ap_id,
            ephemeral_public_key: params.ephemeral_public_key,
            recovery_secret_hash: params.recovery_secret_hash,
            requester_signature: params.requester_signature,
            status: RecoveryStatus::Pending,
            created_at: now,
            expires_at: now + self.config.recovery_ttl,
        };

        self.store.create_recovery_request(request.clone()).await?;

        info!(
            id = %request.id,
            username = %request.username,
            source = %request.source_ap_id,
            "Recovery request initiated"
        );
        Ok(request)
    }

    /// Accept the account-holding AP's response: at most one per request
    /// id, and only while the request is PENDING and unexpired.
    pub async fn respond(
        &self,
        request_id: &str,
        encrypted_user_data: String,
        source_ap_id: String,
        source_ap_signature: String,
    ) -> Result<RecoveryResponse, RecoveryError> {
        let request = self
            .store
            .get_recovery_request(request_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(request_id.to_string()))?;

        // Expired-but-unswept reads the same as EXPIRED
        match request.status.observed(request.expires_at, Utc::now()) {
            RecoveryStatus::Pending => {}
            RecoveryStatus::Expired => return Err(RecoveryError::RequestExpired),
            RecoveryStatus::Completed => return Err(RecoveryError::AlreadyResponded),
        }

        // Only the AP that owns the account may respond
        if source_ap_id != request.source_ap_id {
            warn!(
                id = %request_id,
                claimed = %source_ap_id,
                expected = %request.source_ap_id,
                "Recovery response from an AP that does not own the account"
            );
            return Err(RecoveryError::InvalidSignature(
                "response not signed by the account's home AP".into(),
            ));
        }

        let key = self
            .registry
            .get_peer(&source_ap_id)
            .ok_or_else(|| RecoveryError::UnknownPeerAp(source_ap_id.clone()))?;

        let canonical = response_signing_string(
            request_id,
            &encrypted_user_data,
            &request.requesting_ap_id,
            &source_ap_id,
        );
        if !key.verify(&canonical, &source_ap_signature) {
            warn!(id = %request_id, ap = %source_ap_id, "Recovery response signature rejected");
            return Err(RecoveryError::InvalidSignature(
                "source AP signature does not match response".into(),
            ));
        }

        let response = RecoveryResponse {
            request_id: request_id.to_string(),
            encrypted_user_data,
            target_ap_id: request.requesting_ap_id.clone(),
            source_ap_id,
            source_ap_signature,
            created_at: Utc::now(),
        };

        // Single conditional update: a racing responder loses here
        self.store
            .complete_recovery_request(request_id, response.clone())
            .await
            .map_err(|e| match e {
                crate::storage::StorageError::Conflict(_) => RecoveryError::AlreadyResponded,
                crate::storage::StorageError::NotFound(id) => RecoveryError::NotFound(id),
                other => RecoveryError::Storage(other),
            })?;

        info!(id = %request_id, "Recovery response accepted");
        Ok(response)
    }

    /// Release this AP's own account in answer to a pending request: check
    /// the presented secret hash against the user record (with attempt and
    /// lockout bookkeeping), seal the escrowed credentials under the
    /// request's ephemeral key, sign, and respond.
    pub async fn release(&self, request_id: &str) -> Result<RecoveryResponse, RecoveryError> {
        let request = self
            .store
            .get_recovery_request(request_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(request_id.to_string()))?;

        match request.status.observed(request.expires_at, Utc::now()) {
            RecoveryStatus::Pending => {}
            RecoveryStatus::Expired => return Err(RecoveryError::RequestExpired),
            RecoveryStatus::Completed => return Err(RecoveryError::AlreadyResponded),
        }

        // This node can only release accounts it is the home AP for
        if request.source_ap_id != self.registry.ap_id() {
            return Err(RecoveryError::NotFound(request.username.clone()));
        }

        let presented = request
            .recovery_secret_hash
            .as_deref()
            .ok_or(RecoveryError::SecretMismatch)?;

        // Unknown accounts read as a mismatch so existence is not leaked
        let mut user = self
            .store
            .get_user(&request.username)
            .await?
            .ok_or(RecoveryError::SecretMismatch)?;

        let now = Utc::now();
        let outcome = account::verify_recovery_attempt(&mut user, presented, &self.config, now);
        let sealed = match &outcome {
            Ok(()) => {
                let bundle = credential_bundle(&user);
                Some(
                    crypto::seal(&request.ephemeral_public_key, bundle.as_bytes())
                        .map_err(|e| RecoveryError::Sealing(e.to_string()))?,
                )
            }
            Err(_) => None,
        };
        self.store.put_user(user).await?;
        outcome?;

        let encrypted_user_data = sealed.expect("sealed payload exists on success");
        let canonical = response_signing_string(
            request_id,
            &encrypted_user_data,
            &request.requesting_ap_id,
            self.registry.ap_id(),
        );
        let signature = self.registry.sign(&canonical);

        self.respond(
            request_id,
            encrypted_user_data,
            self.registry.ap_id().to_string(),
            signature,
        )
        .await
    }

    /// Idempotent read of the response for a request
    pub async fn fetch(&self, request_id: &str) -> Result<RecoveryResponse, RecoveryError> {
        self.store
            .get_recovery_response(request_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(request_id.to_string()))
    }
}

/// The plaintext credential bundle sealed into a recovery response. The
/// real username travels only inside the sealed payload.
fn credential_bundle(user: &crate::storage::User) -> String {
    encoding::canonicalize(&json!({
        "username": user.username,
        "public_key": user.public_key,
        "escrowed_credentials": user.escrowed_credentials,
    }))
}
