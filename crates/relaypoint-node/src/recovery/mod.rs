//! Identity recovery
//!
//! Two flows re-establish a user's identity through knowledge of a recovery
//! secret, without either AP trusting the other's database:
//!
//! - [`local::RecoveryCoordinator`] - same-AP recovery keyed by a
//!   recovery-secret hash
//! - [`cross_ap::CrossApRecoveryCoordinator`] - a user at AP-B proves they
//!   registered at AP-A; AP-A releases their credentials sealed under a key
//!   only the requesting client holds
//!
//! Every failure is a distinct kind: callers (rate limiting, lockout
//! policy) must branch on which one occurred, so nothing here collapses
//! into a generic error.

pub mod account;
pub mod cross_ap;
pub mod local;

pub use cross_ap::CrossApRecoveryCoordinator;
pub use local::RecoveryCoordinator;

use crate::storage::StorageError;

/// Errors surfaced by the recovery coordinators
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// A signature over a recovery payload did not verify
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The request or session is past its expiry (stored or observed)
    #[error("Recovery request expired")]
    RequestExpired,

    /// A response was already accepted for this recovery request
    #[error("Recovery request already has a response")]
    AlreadyResponded,

    /// The cross-AP session already completed
    #[error("Recovery session already completed")]
    AlreadyCompleted,

    /// No such request, session or response
    #[error("Not found: {0}")]
    NotFound(String),

    /// The presented recovery-secret hash does not match the account.
    /// Unknown accounts and accounts with no enrolled secret read the same
    /// way, so existence is not leaked.
    #[error("Recovery secret does not match")]
    SecretMismatch,

    /// The account is locked against recovery attempts
    #[error("Account locked: {0}")]
    AccountLocked(String),

    /// The signing AP is not registered as a federation peer
    #[error("Unknown peer AP: {0}")]
    UnknownPeerAp(String),

    /// Sealing the credential payload failed
    #[error("Credential sealing failed: {0}")]
    Sealing(String),

    /// Storage-layer failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
