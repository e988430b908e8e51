//! Error types for the Relaypoint core

use thiserror::Error;

/// Result type alias using IdentityError
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors that can occur in the Relaypoint core
#[derive(Error, Debug)]
pub enum IdentityError {
    /// A token segment could not be base64/JSON decoded
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// A token did not have the expected segment structure
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// A certificate did not have the expected segment structure
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    /// Signature verification failed where a hard failure is required
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Cryptographic error (bad key material, sealing failure)
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ed25519_dalek::SignatureError> for IdentityError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        IdentityError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        IdentityError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for IdentityError {
    fn from(err: base64::DecodeError) -> Self {
        IdentityError::MalformedEncoding(err.to_string())
    }
}
