//! # Relaypoint Core
//!
//! Wire formats and cryptographic primitives for the Relaypoint federation,
//! shared by Access Points and clients.
//!
//! ## Key Concepts
//!
//! - **AP (Access Point)**: a federation node that issues identity tokens to
//!   its own users and signs their public keys
//! - **Identity token**: `base64(payload).signature.ap-certificate` - the
//!   chain user key → AP key → administrative root
//! - **Temporary token**: a short-lived, reduced-privilege token scoping a
//!   client to an in-progress recovery handshake
//! - **Sealed box**: credential payloads returned during recovery, encrypted
//!   under an ephemeral key only the requesting client holds
//!
//! ## Canonicalization
//!
//! Every signature covers the canonical JSON of its payload (sorted keys, no
//! whitespace). [`encoding::canonicalize`] is the single source of those
//! bytes for signing and verification alike.

pub mod certificate;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod token;

pub use certificate::{ApCertificate, ApCertificatePayload, DeviceCertificate};
pub use crypto::{EphemeralKeyPair, KeyPair, PublicKey};
pub use error::{IdentityError, Result};
pub use token::{IdentityToken, TokenPayload};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
