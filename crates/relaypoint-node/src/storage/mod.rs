//! Storage abstraction for the Access Point
//!
//! This module provides a trait-based abstraction over the node's persisted
//! state, enabling both in-memory (default) and future persistent backends.
//!
//! The recovery coordinators lean on exactly one concurrency guarantee from
//! this layer: [`Store::complete_recovery_request`] and
//! [`Store::complete_cross_session`] are single conditional updates that
//! succeed only while the row is still PENDING. Racing completions for the
//! same id therefore produce exactly one winner; losers observe
//! [`StorageError::Conflict`].

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conditional update conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Lifecycle of a recovery request or cross-AP session.
///
/// PENDING is the only live state; COMPLETED and EXPIRED are terminal.
/// Expiry is evaluated lazily at read time - a stored PENDING row whose
/// `expires_at` has passed is reported EXPIRED without being rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStatus {
    Pending,
    Completed,
    Expired,
}

impl RecoveryStatus {
    /// Observed status given the stored status and the row's expiry
    pub fn observed(self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        match self {
            RecoveryStatus::Pending if now > expires_at => RecoveryStatus::Expired,
            other => other,
        }
    }
}

/// One registered identity at this AP.
///
/// Mutated only by the recovery coordinators on attempt/lock/success
/// events; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique username at this AP
    pub username: String,
    /// The user's base64 Ed25519 public key, signed into their token
    pub public_key: String,
    /// Salted hash of the recovery secret (always salted)
    pub recovery_secret_hash: Option<String>,
    /// Per-user salt for the recovery secret
    pub recovery_secret_salt: Option<String>,
    /// When the recovery secret last changed
    pub secret_updated_at: Option<DateTime<Utc>>,
    /// Signature provenance of a recovery that re-established this identity
    pub recovery_signature: Option<String>,
    /// AP the recovery credentials came from
    pub recovery_source_ap: Option<String>,
    /// Consecutive failed recovery attempts
    pub failed_attempts: u32,
    /// Time of the most recent recovery attempt
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Whether the account is locked against recovery
    pub locked: bool,
    /// Lock expiry; a lock past its expiry is treated as unlocked at read
    /// time (lazy expiry, never swept)
    pub locked_until: Option<DateTime<Utc>>,
    /// Why the account was locked
    pub lock_reason: Option<String>,
    /// Optional device fingerprint from enrollment
    pub device_fingerprint: Option<String>,
    /// Optional IP fingerprint from enrollment
    pub ip_fingerprint: Option<String>,
    /// Successful recoveries completed for this account
    pub successful_recoveries: u32,
    /// Free-form security flags
    pub security_flags: Vec<String>,
    /// Opaque escrowed credential bundle released (sealed) during recovery
    pub escrowed_credentials: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a freshly registered user with no recovery material
    pub fn new(username: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            public_key: public_key.into(),
            recovery_secret_hash: None,
            recovery_secret_salt: None,
            secret_updated_at: None,
            recovery_signature: None,
            recovery_source_ap: None,
            failed_attempts: 0,
            last_attempt_at: None,
            locked: false,
            locked_until: None,
            lock_reason: None,
            device_fingerprint: None,
            ip_fingerprint: None,
            successful_recoveries: 0,
            security_flags: Vec::new(),
            escrowed_credentials: None,
            created_at: Utc::now(),
        }
    }
}

/// One same-AP recovery attempt. Immutable once non-PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Unique request id
    pub id: String,
    /// Bare username being recovered
    pub username: String,
    /// Home AP of the account
    pub source_ap_id: String,
    /// AP the request was made at (may equal source)
    pub requesting_ap_id: String,
    /// Requester-supplied ephemeral public key for response encryption
    pub ephemeral_public_key: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: Option<String>,
    /// Requester's signature over the request payload
    pub requester_signature: String,
    /// Stored lifecycle status
    pub status: RecoveryStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry; PENDING past this point reads as EXPIRED
    pub expires_at: DateTime<Utc>,
}

/// At most one response per recovery request, sharing its id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResponse {
    /// Id of the request this answers
    pub request_id: String,
    /// Credentials sealed under the request's ephemeral public key
    pub encrypted_user_data: String,
    /// AP the response is addressed to
    pub target_ap_id: String,
    /// AP that produced the response
    pub source_ap_id: String,
    /// Producing AP's signature over the response payload
    pub source_ap_signature: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One cross-AP recovery session, keyed by a server-minted temporary user
/// id distinct from any permanent username.
///
/// Only `response_received`, `response_data`, `status` and `updated_at`
/// mutate after creation, exactly once, via
/// [`Store::complete_cross_session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossApSession {
    /// Temporary user id identifying this session
    pub temp_user_id: String,
    /// AP the requester is currently at
    pub requesting_ap_id: String,
    /// Claimed home AP holding the account
    pub destination_ap_id: String,
    /// Salted hash of the presented recovery secret
    pub recovery_secret_hash: String,
    /// Claimed real username at the destination AP
    pub username: String,
    /// AP that originated the session
    pub source_ap_id: String,
    /// Requester-supplied ephemeral public key for response encryption
    pub ephemeral_public_key: String,
    /// Stored lifecycle status
    pub status: RecoveryStatus,
    /// Whether an inbound response has been accepted
    pub response_received: bool,
    /// Cached raw response payload, set with `response_received`
    pub response_data: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry; PENDING past this point reads as EXPIRED
    pub expires_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Cross-AP recovery response, keyed by the session's temporary user id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossApRecoveryResponse {
    /// Temporary user id of the session this answers
    pub temp_user_id: String,
    /// Credentials sealed under the session's ephemeral public key
    pub encrypted_user_data: String,
    /// AP that receives the credentials
    pub requesting_ap_id: String,
    /// AP that released the credentials
    pub source_ap_id: String,
    /// Releasing AP's signature over the response payload
    pub source_ap_signature: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A banned device-identity nickname (`username@ap_id`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistedDevice {
    /// Composite nickname, `username@ap_id`
    pub nickname: String,
    /// Why the device was banned
    pub reason: Option<String>,
    /// When the entry was added
    pub added_at: DateTime<Utc>,
}

/// Storage backend trait for Access Point state
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    // =========================================================================
    // Users
    // =========================================================================

    /// Fetch a user by username
    async fn get_user(&self, username: &str) -> Result<Option<User>, StorageError>;

    /// Insert or replace a user record
    async fn put_user(&self, user: User) -> Result<(), StorageError>;

    // =========================================================================
    // Same-AP Recovery
    // =========================================================================

    /// Persist a new recovery request; fails if the id exists
    async fn create_recovery_request(&self, request: RecoveryRequest)
        -> Result<(), StorageError>;

    /// Fetch a recovery request by id
    async fn get_recovery_request(
        &self,
        id: &str,
    ) -> Result<Option<RecoveryRequest>, StorageError>;

    /// Conditionally complete a recovery request: writes the response and
    /// flips PENDING to COMPLETED in one update. Fails with
    /// [`StorageError::Conflict`] if the request is no longer PENDING.
    async fn complete_recovery_request(
        &self,
        id: &str,
        response: RecoveryResponse,
    ) -> Result<(), StorageError>;

    /// Fetch the response for a recovery request, if one was accepted
    async fn get_recovery_response(
        &self,
        id: &str,
    ) -> Result<Option<RecoveryResponse>, StorageError>;

    // =========================================================================
    // Cross-AP Recovery
    // =========================================================================

    /// Persist a new cross-AP session; fails if the temp id collides
    async fn create_cross_session(&self, session: CrossApSession) -> Result<(), StorageError>;

    /// Fetch a cross-AP session by temporary user id
    async fn get_cross_session(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApSession>, StorageError>;

    /// Conditionally complete a cross-AP session: sets `response_received`,
    /// caches the payload, stores the response record and flips PENDING to
    /// COMPLETED in one update. Fails with [`StorageError::Conflict`] if
    /// the session is no longer PENDING.
    async fn complete_cross_session(
        &self,
        temp_user_id: &str,
        response: CrossApRecoveryResponse,
    ) -> Result<(), StorageError>;

    /// Fetch the stored cross-AP response, if one was accepted
    async fn get_cross_response(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryResponse>, StorageError>;

    // =========================================================================
    // Blacklist
    // =========================================================================

    /// Whether a device-identity nickname is banned. Membership is the only
    /// operation the authentication pipeline needs; entry lifecycle is
    /// managed outside the node.
    async fn is_blacklisted(&self, nickname: &str) -> Result<bool, StorageError>;

    /// Add a banned device-identity nickname
    async fn add_blacklisted(&self, entry: BlacklistedDevice) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_status_lazy_expiry() {
        let now = Utc::now();
        let past = now - chrono::Duration::minutes(5);
        let future = now + chrono::Duration::minutes(5);

        assert_eq!(
            RecoveryStatus::Pending.observed(future, now),
            RecoveryStatus::Pending
        );
        assert_eq!(
            RecoveryStatus::Pending.observed(past, now),
            RecoveryStatus::Expired
        );
        // Terminal states are unaffected by expiry
        assert_eq!(
            RecoveryStatus::Completed.observed(past, now),
            RecoveryStatus::Completed
        );
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&RecoveryStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&RecoveryStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(
            serde_json::to_string(&RecoveryStatus::Expired).unwrap(),
            "\"EXPIRED\""
        );
    }
}
