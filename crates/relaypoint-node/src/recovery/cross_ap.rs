//! Cross-AP recovery coordination
//!
//! A user at AP-B proves they registered at AP-A and AP-A releases their
//! credentials back to AP-B, sealed under a key only the requesting client
//! holds. Neither AP trusts the other's database: AP-A checks the
//! recovery-secret hash against its own records, AP-B checks AP-A's
//! signature against its registered peer key, and the credential plaintext
//! is visible to neither.
//!
//! Sessions are keyed by a server-minted temporary user id, never a real
//! username, so no identity leaks before verification succeeds.

use crate::config::NodeConfig;
use crate::issuer::TokenIssuer;
use crate::keys::KeyRegistry;
use crate::recovery::{account, RecoveryError};
use crate::storage::{
    CrossApRecoveryResponse, CrossApSession, RecoveryStatus, StorageError, Store,
};
use chrono::{DateTime, Utc};
use relaypoint_core::crypto;
use relaypoint_core::encoding;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts to mint a non-colliding temporary id before giving up. A v4
/// uuid collision against live sessions is already vanishingly unlikely.
const MAX_MINT_ATTEMPTS: usize = 8;

/// Parameters for starting a cross-AP recovery session
#[derive(Debug, Clone)]
pub struct InitiateCrossRecovery {
    /// AP the requester is currently at
    pub requesting_ap_id: String,
    /// Claimed home AP holding the account
    pub destination_ap_id: String,
    /// Claimed real username at the destination AP
    pub username: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: String,
    /// Ephemeral public key the response will be sealed under
    pub ephemeral_public_key: String,
}

/// What `initiate` hands back to the client
#[derive(Debug, Clone)]
pub struct CrossRecoveryTicket {
    /// Temporary user id identifying the session
    pub temp_user_id: String,
    /// Temporary token for polling the session
    pub temporary_token: String,
    /// Session expiry
    pub expires_at: DateTime<Utc>,
}

/// Observed session state returned by `poll`
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Observed status (lazy expiry applied)
    pub status: RecoveryStatus,
    /// Sealed credential payload, present once COMPLETED
    pub response_data: Option<String>,
}

/// An inbound claim from a peer AP asking this node to release an account
#[derive(Debug, Clone)]
pub struct CredentialClaim {
    /// Temporary session id at the requesting AP, echoed for correlation
    pub temp_user_id: String,
    /// Username whose credentials are claimed
    pub username: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: String,
    /// Ephemeral public key to seal the credentials under
    pub ephemeral_public_key: String,
    /// AP making the claim on the user's behalf
    pub requesting_ap_id: String,
}

/// The canonical string a cross-AP response signature covers
pub fn response_signing_string(
    temp_user_id: &str,
    encrypted_user_data: &str,
    requesting_ap_id: &str,
    source_ap_id: &str,
) -> String {
    encoding::canonicalize(&json!({
        "temp_user_id": temp_user_id,
        "encrypted_user_data": encrypted_user_data,
        "requesting_ap_id": requesting_ap_id,
        "source_ap_id": source_ap_id,
    }))
}

/// Coordinates cross-AP recovery sessions, on both sides of the exchange
#[derive(Debug, Clone)]
pub struct CrossApRecoveryCoordinator {
    store: Arc<dyn Store>,
    registry: Arc<KeyRegistry>,
    config: Arc<NodeConfig>,
    issuer: TokenIssuer,
}

impl CrossApRecoveryCoordinator {
    /// Create a coordinator over the node's store, keys and token issuer
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<KeyRegistry>,
        config: Arc<NodeConfig>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            issuer,
        }
    }

    /// Start a session: mint a fresh temporary id (regenerating on the
    /// off-chance of a live collision), persist PENDING with the configured
    /// TTL, and hand back a temporary token so the client can poll before
    /// recovery completes.
    pub async fn initiate(
        &self,
        params: InitiateCrossRecovery,
    ) -> Result<CrossRecoveryTicket, RecoveryError> {
        let now = Utc::now();
        let expires_at = now + self.config.cross_recovery_ttl;

        for _ in 0..MAX_MINT_ATTEMPTS {
            let temp_user_id = format!("tmp-{}", Uuid::new_v4());
            let session = CrossApSession {
                temp_user_id: temp_user_id.clone(),
                requesting_ap_id: params.requesting_ap_id.clone(),
                destination_ap_id: params.destination_ap_id.clone(),
                recovery_secret_hash: params.recovery_secret_hash.clone(),
                username: params.username.clone(),
                source_ap_id: params.requesting_ap_id.clone(),
                ephemeral_public_key: params.ephemeral_public_key.clone(),
                status: RecoveryStatus::Pending,
                response_received: false,
                response_data: None,
                created_at: now,
                expires_at,
                updated_at: now,
            };

            match self.store.create_cross_session(session).await {
                Ok(()) => {
                    let temporary_token = self
                        .issuer
                        .issue_temporary_token(&temp_user_id, &params.username);
                    info!(
                        temp_user_id = %temp_user_id,
                        destination = %params.destination_ap_id,
                        "Cross-AP recovery session opened"
                    );
                    return Ok(CrossRecoveryTicket {
                        temp_user_id,
                        temporary_token,
                        expires_at,
                    });
                }
                Err(StorageError::AlreadyExists(_)) => continue,
                Err(other) => return Err(RecoveryError::Storage(other)),
            }
        }

        Err(RecoveryError::Storage(StorageError::Database(
            "could not mint a unique temporary user id".into(),
        )))
    }

    /// Accept the destination AP's response for a session.
    ///
    /// The session must exist, be PENDING and unexpired; the sender's
    /// signature must verify against its registered peer key; and the
    /// completion is a single conditional update, so a duplicate or racing
    /// submission gets `AlreadyCompleted` instead of overwriting anything.
    pub async fn submit_response(
        &self,
        temp_user_id: &str,
        encrypted_user_data: String,
        source_ap_id: String,
        source_ap_signature: String,
    ) -> Result<(), RecoveryError> {
        let session = self
            .store
            .get_cross_session(temp_user_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(temp_user_id.to_string()))?;

        match session.status.observed(session.expires_at, Utc::now()) {
            RecoveryStatus::Pending => {}
            RecoveryStatus::Expired => return Err(RecoveryError::RequestExpired),
            RecoveryStatus::Completed => return Err(RecoveryError::AlreadyCompleted),
        }

        // Only the AP the session was opened against may answer it
        if source_ap_id != session.destination_ap_id {
            warn!(
                temp_user_id = %temp_user_id,
                claimed = %source_ap_id,
                expected = %session.destination_ap_id,
                "Cross-AP response from unexpected AP"
            );
            return Err(RecoveryError::InvalidSignature(
                "response not signed by the session's destination AP".into(),
            ));
        }

        let key = self
            .registry
            .get_peer(&source_ap_id)
            .ok_or_else(|| RecoveryError::UnknownPeerAp(source_ap_id.clone()))?;

        let canonical = response_signing_string(
            temp_user_id,
            &encrypted_user_data,
            &session.requesting_ap_id,
            &source_ap_id,
        );
        if !key.verify(&canonical, &source_ap_signature) {
            warn!(temp_user_id = %temp_user_id, ap = %source_ap_id, "Cross-AP response signature rejected");
            return Err(RecoveryError::InvalidSignature(
                "source AP signature does not match response".into(),
            ));
        }

        let response = CrossApRecoveryResponse {
            temp_user_id: temp_user_id.to_string(),
            encrypted_user_data,
            requesting_ap_id: session.requesting_ap_id.clone(),
            source_ap_id,
            source_ap_signature,
            created_at: Utc::now(),
        };

        // Single conditional update guarded by the PENDING precondition
        self.store
            .complete_cross_session(temp_user_id, response)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => RecoveryError::AlreadyCompleted,
                StorageError::NotFound(id) => RecoveryError::NotFound(id),
                other => RecoveryError::Storage(other),
            })?;

        info!(temp_user_id = %temp_user_id, "Cross-AP recovery response accepted");
        Ok(())
    }

    /// Read-only session status. A PENDING session past its expiry reports
    /// EXPIRED - a pure function of `now` and `expires_at`, with no write,
    /// so every reader observes the same status from that point on.
    pub async fn poll(&self, temp_user_id: &str) -> Result<PollOutcome, RecoveryError> {
        let session = self
            .store
            .get_cross_session(temp_user_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(temp_user_id.to_string()))?;

        let status = session.status.observed(session.expires_at, Utc::now());
        let response_data = match status {
            RecoveryStatus::Completed => session.response_data,
            _ => None,
        };

        Ok(PollOutcome {
            status,
            response_data,
        })
    }

    /// Destination-AP side: release an account's credentials to a claiming
    /// peer.
    ///
    /// The real username is only ever released after the presented
    /// recovery-secret hash matches the stored record (compared in constant
    /// time, with attempt counting and lockout). The credentials are sealed
    /// under the claim's ephemeral public key: this AP signs the ciphertext
    /// and never learns whether it was decrypted.
    pub async fn release_credentials(
        &self,
        claim: CredentialClaim,
    ) -> Result<CrossApRecoveryResponse, RecoveryError> {
        // Unknown accounts read as a mismatch so existence is not leaked
        let mut user = self
            .store
            .get_user(&claim.username)
            .await?
            .ok_or(RecoveryError::SecretMismatch)?;

        let now = Utc::now();
        let outcome =
            account::verify_recovery_attempt(&mut user, &claim.recovery_secret_hash, &self.config, now);

        let sealed = match &outcome {
            Ok(()) => {
                let bundle = encoding::canonicalize(&json!({
                    "username": user.username,
                    "public_key": user.public_key,
                    "escrowed_credentials": user.escrowed_credentials,
                }));
                Some(
                    crypto::seal(&claim.ephemeral_public_key, bundle.as_bytes())
                        .map_err(|e| RecoveryError::Sealing(e.to_string()))?,
                )
            }
            Err(_) => None,
        };

        if outcome.is_err() {
            // Persist the attempt/lock bookkeeping before surfacing the
            // failure kind to the caller
            self.store.put_user(user).await?;
            warn!(username = %claim.username, requesting_ap = %claim.requesting_ap_id, "Credential claim rejected");
            return Err(outcome.unwrap_err());
        }

        let encrypted_user_data = sealed.expect("sealed payload exists on success");
        let canonical = response_signing_string(
            &claim.temp_user_id,
            &encrypted_user_data,
            &claim.requesting_ap_id,
            self.registry.ap_id(),
        );
        let signature = self.registry.sign(&canonical);

        account::record_recovery_provenance(&mut user, &claim.requesting_ap_id, &signature);
        self.store.put_user(user).await?;

        info!(
            temp_user_id = %claim.temp_user_id,
            requesting_ap = %claim.requesting_ap_id,
            "Released sealed credentials to claiming AP"
        );

        Ok(CrossApRecoveryResponse {
            temp_user_id: claim.temp_user_id,
            encrypted_user_data,
            requesting_ap_id: claim.requesting_ap_id,
            source_ap_id: self.registry.ap_id().to_string(),
            source_ap_signature: signature,
            created_at: now,
        })
    }
}
