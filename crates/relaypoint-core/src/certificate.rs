//! AP and device certificates
//!
//! Both certificate kinds are two-segment strings
//! `base64(payload-json).signature`, signed by the administrative root key:
//!
//! - An [`ApCertificate`] proves an Access Point's public key. It is issued
//!   once at AP provisioning and travels as the third segment of every
//!   identity token the AP issues, so any peer can verify the token chain
//!   without knowing the AP beforehand.
//! - A [`DeviceCertificate`] (the per-device "PU" credential) proves a
//!   device's public key and binds it to a `username@ap_id` identity.

use crate::crypto::{KeyPair, PublicKey};
use crate::encoding;
use crate::error::{IdentityError, Result};
use serde::{Deserialize, Serialize};

/// Payload of an AP certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApCertificatePayload {
    /// AP this certificate was issued to
    pub ap_id: String,
    /// The AP's base64 Ed25519 public key
    pub public_key: String,
    /// Issuance time (RFC 3339)
    pub issued_at: String,
}

/// Root-signed certificate proving an AP's public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApCertificate {
    /// Decoded certificate payload
    pub payload: ApCertificatePayload,
    /// Root signature over the canonical payload
    pub signature: String,
}

impl ApCertificate {
    /// Issue a certificate for an AP, signed with the administrative root key
    pub fn issue(root: &KeyPair, ap_id: impl Into<String>, ap_public_key: &PublicKey) -> Self {
        let payload = ApCertificatePayload {
            ap_id: ap_id.into(),
            public_key: ap_public_key.to_base64(),
            issued_at: chrono::Utc::now().to_rfc3339(),
        };
        let signature = root.sign(&signing_string(&payload));
        Self { payload, signature }
    }

    /// Parse a certificate from its two-segment wire form
    pub fn parse(raw: &str) -> Result<Self> {
        let (payload, signature) = split_segments(raw)?;
        let payload = serde_json::from_value(encoding::decode(&payload)?)
            .map_err(|e| IdentityError::MalformedCertificate(e.to_string()))?;
        Ok(Self { payload, signature })
    }

    /// Render the certificate to its wire form
    pub fn to_wire(&self) -> String {
        let payload = serde_json::to_value(&self.payload).unwrap_or_default();
        format!("{}.{}", encoding::encode(&payload), self.signature)
    }

    /// Verify the root signature over this certificate
    pub fn verify(&self, root: &PublicKey) -> bool {
        root.verify(&signing_string(&self.payload), &self.signature)
    }
}

/// Payload of a device certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCertificatePayload {
    /// Username the device belongs to
    pub username: String,
    /// Home AP of the device's user
    pub ap_id: String,
    /// The device's base64 Ed25519 public key. Required by verification;
    /// optional here so a certificate missing it parses and fails the
    /// explicit check instead of the decoder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Issuance time (RFC 3339)
    pub issued_at: String,
}

/// Root-signed certificate binding a device key to a user identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCertificate {
    /// Decoded certificate payload
    pub payload: DeviceCertificatePayload,
    /// Root signature over the canonical payload
    pub signature: String,
}

impl DeviceCertificate {
    /// Issue a device certificate signed with the administrative root key
    pub fn issue(
        root: &KeyPair,
        username: impl Into<String>,
        ap_id: impl Into<String>,
        device_public_key: &PublicKey,
    ) -> Self {
        let payload = DeviceCertificatePayload {
            username: username.into(),
            ap_id: ap_id.into(),
            public_key: Some(device_public_key.to_base64()),
            issued_at: chrono::Utc::now().to_rfc3339(),
        };
        let signature = root.sign(&device_signing_string(&payload));
        Self { payload, signature }
    }

    /// Parse a device certificate from its two-segment wire form
    pub fn parse(raw: &str) -> Result<Self> {
        let (payload, signature) = split_segments(raw)?;
        let payload = serde_json::from_value(encoding::decode(&payload)?)
            .map_err(|e| IdentityError::MalformedCertificate(e.to_string()))?;
        Ok(Self { payload, signature })
    }

    /// Render the certificate to its wire form
    pub fn to_wire(&self) -> String {
        let payload = serde_json::to_value(&self.payload).unwrap_or_default();
        format!("{}.{}", encoding::encode(&payload), self.signature)
    }

    /// Verify the root signature over this certificate
    pub fn verify(&self, root: &PublicKey) -> bool {
        root.verify(&device_signing_string(&self.payload), &self.signature)
    }

    /// The composite device-identity nickname, `username@ap_id`
    pub fn nickname(&self) -> String {
        format!("{}@{}", self.payload.username, self.payload.ap_id)
    }
}

/// Canonical string an AP certificate signature covers
fn signing_string(payload: &ApCertificatePayload) -> String {
    encoding::canonicalize(&serde_json::to_value(payload).unwrap_or_default())
}

/// Canonical string a device certificate signature covers
fn device_signing_string(payload: &DeviceCertificatePayload) -> String {
    encoding::canonicalize(&serde_json::to_value(payload).unwrap_or_default())
}

/// Split a two-segment credential into (payload segment, signature)
fn split_segments(raw: &str) -> Result<(String, String)> {
    let mut parts = raw.splitn(2, '.');
    let payload = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| IdentityError::MalformedCertificate("empty certificate".into()))?;
    let signature = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IdentityError::MalformedCertificate("missing signature segment".into()))?;
    Ok((payload.to_string(), signature.to_string()))
}
