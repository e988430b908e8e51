//! Cryptographic primitives for token and recovery signing
//!
//! This module implements Ed25519 signing over canonical payload strings,
//! the sealed-box encryption used to return recovered credentials under a
//! requester's ephemeral key, and recovery-secret hashing.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair for signing
//! - `PublicKey`: Ed25519 public key for verification
//! - `EphemeralKeyPair`: one-time X25519 pair a recovery requester generates
//!   to receive an encrypted response

use crate::error::{IdentityError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Domain separator for the sealed-box key derivation
const SEAL_INFO: &[u8] = b"relaypoint-recovery-seal-v1";

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_LEN: usize = 12;

/// X25519 public key length in bytes
const X25519_KEY_LEN: usize = 32;

// =============================================================================
// Signing Keys
// =============================================================================

/// Ed25519 key pair for signing tokens, certificates and recovery payloads
#[derive(Clone)]
pub struct KeyPair {
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from raw signing-key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from a base64-encoded signing key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD.decode(encoded)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::CryptoError("Invalid signing key length".into()))?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Get the public half of this key pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw signing key bytes
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a canonical payload string, returning a base64 signature
    pub fn sign(&self, message: &str) -> String {
        let signature = self.signing_key.sign(message.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }
}

/// Ed25519 public key for verification
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Ed25519 verifying key
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("key", &self.to_base64())
            .finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| IdentityError::CryptoError(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    /// Create a public key from its base64 encoding
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| IdentityError::CryptoError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::CryptoError("Invalid public key length".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Get the base64 encoding of this key
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.to_bytes())
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a base64 signature over a canonical payload string.
    ///
    /// Returns false on any failure, including malformed signature input, so
    /// callers branch uniformly instead of handling decode errors.
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(sig_bytes) = STANDARD.decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        self.verifying_key
            .verify(message.as_bytes(), &signature)
            .is_ok()
    }
}

/// Verify a base64 signature against a base64-encoded public key.
///
/// Returns false (never errors) when the key itself is malformed. This is
/// the uniform entry point for verifying signatures from untrusted wire
/// material.
pub fn verify_with_encoded_key(message: &str, signature: &str, public_key: &str) -> bool {
    match PublicKey::from_base64(public_key) {
        Ok(key) => key.verify(message, signature),
        Err(_) => false,
    }
}

// =============================================================================
// Sealed-Box Credential Encryption
// =============================================================================

/// One-time X25519 key pair a recovery requester generates to receive an
/// encrypted credential payload. The secret half never leaves the client.
pub struct EphemeralKeyPair {
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public_key_base64())
            .finish()
    }
}

impl EphemeralKeyPair {
    /// Generate a fresh one-time key pair
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the base64 encoding of the public key for inclusion in a
    /// recovery request
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Open a sealed payload produced by [`seal`] for this key pair
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| IdentityError::CryptoError(format!("invalid sealed payload: {}", e)))?;

        if bytes.len() < X25519_KEY_LEN + NONCE_LEN {
            return Err(IdentityError::CryptoError(
                "sealed payload too short".into(),
            ));
        }

        let mut sender_pub = [0u8; X25519_KEY_LEN];
        sender_pub.copy_from_slice(&bytes[..X25519_KEY_LEN]);
        let sender_pub = x25519_dalek::PublicKey::from(sender_pub);
        let nonce = &bytes[X25519_KEY_LEN..X25519_KEY_LEN + NONCE_LEN];
        let ciphertext = &bytes[X25519_KEY_LEN + NONCE_LEN..];

        let shared = self.secret.diffie_hellman(&sender_pub);
        let key = derive_seal_key(shared.as_bytes())?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| IdentityError::CryptoError("sealed payload failed to open".into()))
    }
}

/// Seal a credential payload under a recipient's ephemeral X25519 public key.
///
/// The output is `base64(sender_pub || nonce || ciphertext)`. The sender key
/// is generated per call and discarded, so only the holder of the ephemeral
/// secret can open the box - the sealing AP never learns whether it was.
pub fn seal(recipient_public_key: &str, plaintext: &[u8]) -> Result<String> {
    let recipient = STANDARD
        .decode(recipient_public_key)
        .map_err(|e| IdentityError::CryptoError(format!("invalid recipient key: {}", e)))?;
    let recipient: [u8; X25519_KEY_LEN] = recipient
        .try_into()
        .map_err(|_| IdentityError::CryptoError("invalid recipient key length".into()))?;
    let recipient = x25519_dalek::PublicKey::from(recipient);

    let sender_secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
    let sender_public = x25519_dalek::PublicKey::from(&sender_secret);
    let shared = sender_secret.diffie_hellman(&recipient);
    let key = derive_seal_key(shared.as_bytes())?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| IdentityError::CryptoError("sealing failed".into()))?;

    let mut out = Vec::with_capacity(X25519_KEY_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(sender_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

fn derive_seal_key(shared_secret: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hk.expand(SEAL_INFO, &mut key)
        .map_err(|_| IdentityError::CryptoError("key derivation failed".into()))?;
    Ok(key)
}

// =============================================================================
// Recovery-Secret Hashing
// =============================================================================

/// Hash a recovery secret with its per-user salt.
///
/// Salts are mandatory: a secret is never stored or compared unsalted.
pub fn hash_recovery_secret(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh random salt for recovery-secret enrollment
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
