//! Key Registry for the Access Point
//!
//! Manages cryptographic keys for:
//! - This AP's signing key pair and its root-issued certificate
//! - The administrative root public key (optional; its absence degrades
//!   chain verification to NOT_APPLICABLE rather than failing closed)
//! - Peer AP public keys for verifying cross-AP recovery signatures

use relaypoint_core::{ApCertificate, IdentityError, KeyPair, PublicKey};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// Key Registry for the Access Point
///
/// Thread-safe storage for:
/// - AP signing key pair (this node's identity)
/// - Administrative root public key (for verifying AP/device certificates)
/// - Peer AP public keys (for verifying payloads signed by other APs)
pub struct KeyRegistry {
    /// This AP's key pair for signing tokens and recovery payloads
    ap_key_pair: KeyPair,

    /// This AP's federation id
    ap_id: String,

    /// This AP's certificate, issued once by the administrative root
    ap_certificate: Option<ApCertificate>,

    /// Administrative root public key, when available
    root_public_key: Option<PublicKey>,

    /// Registered peer AP public keys (ap_id -> key)
    peer_keys: RwLock<HashMap<String, PublicKey>>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("ap_id", &self.ap_id)
            .field("has_certificate", &self.ap_certificate.is_some())
            .field("has_root_key", &self.root_public_key.is_some())
            .finish()
    }
}

impl KeyRegistry {
    /// Create a registry with existing key material
    pub fn new(
        ap_id: impl Into<String>,
        ap_key_pair: KeyPair,
        ap_certificate: Option<ApCertificate>,
        root_public_key: Option<PublicKey>,
    ) -> Self {
        let ap_id = ap_id.into();
        info!(
            ap_id = %ap_id,
            has_certificate = ap_certificate.is_some(),
            has_root_key = root_public_key.is_some(),
            "Key registry initialized"
        );
        Self {
            ap_key_pair,
            ap_id,
            ap_certificate,
            root_public_key,
            peer_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a registry with a fresh AP key and a locally generated root
    /// that certifies it. Used for development and tests; production nodes
    /// load provisioned material instead.
    pub fn generate(ap_id: impl Into<String>) -> Self {
        let ap_id = ap_id.into();
        let root = KeyPair::generate();
        let ap_key_pair = KeyPair::generate();
        let certificate = ApCertificate::issue(&root, &ap_id, &ap_key_pair.public_key());
        Self::new(
            ap_id,
            ap_key_pair,
            Some(certificate),
            Some(root.public_key()),
        )
    }

    /// This AP's federation id
    pub fn ap_id(&self) -> &str {
        &self.ap_id
    }

    /// This AP's public key
    pub fn ap_public_key(&self) -> PublicKey {
        self.ap_key_pair.public_key()
    }

    /// This AP's root-issued certificate, if provisioned
    pub fn ap_certificate(&self) -> Option<&ApCertificate> {
        self.ap_certificate.as_ref()
    }

    /// The administrative root public key, if available
    pub fn root_public_key(&self) -> Option<&PublicKey> {
        self.root_public_key.as_ref()
    }

    // =========================================================================
    // Peer AP Key Management
    // =========================================================================

    /// Register a peer AP's public key
    ///
    /// Peers must be registered before their recovery responses verify.
    pub fn register_peer(&self, ap_id: String, key: PublicKey) {
        let mut peers = self.peer_keys.write().unwrap();
        info!(ap_id = %ap_id, "Registered peer AP key");
        peers.insert(ap_id, key);
    }

    /// Register a peer AP's public key from its base64 encoding
    pub fn register_peer_base64(&self, ap_id: String, key: &str) -> Result<(), IdentityError> {
        let key = PublicKey::from_base64(key)?;
        self.register_peer(ap_id, key);
        Ok(())
    }

    /// Get a peer AP's public key
    pub fn get_peer(&self, ap_id: &str) -> Option<PublicKey> {
        if ap_id == self.ap_id {
            return Some(self.ap_public_key());
        }
        let peers = self.peer_keys.read().unwrap();
        peers.get(ap_id).cloned()
    }

    /// Check whether a peer AP key is registered
    pub fn has_peer(&self, ap_id: &str) -> bool {
        let peers = self.peer_keys.read().unwrap();
        peers.contains_key(ap_id)
    }

    /// List all registered peer AP ids
    pub fn list_peers(&self) -> Vec<String> {
        let peers = self.peer_keys.read().unwrap();
        peers.keys().cloned().collect()
    }

    /// Number of registered peers
    pub fn peer_count(&self) -> usize {
        let peers = self.peer_keys.read().unwrap();
        peers.len()
    }

    // =========================================================================
    // Signing Operations
    // =========================================================================

    /// Sign a canonical payload string with this AP's key
    pub fn sign(&self, message: &str) -> String {
        self.ap_key_pair.sign(message)
    }
}
