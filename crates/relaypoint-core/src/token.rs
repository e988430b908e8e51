//! Identity and temporary token wire format
//!
//! A token is the dot-joined string
//! `base64(payload-json) "." signature ["." ap-certificate]`:
//!
//! - the payload segment is the canonical JSON of a [`TokenPayload`];
//! - the signature is the issuing AP's Ed25519 signature over that canonical
//!   payload;
//! - the optional third segment is the AP's own root-issued
//!   [`ApCertificate`], itself a two-segment dotted string, so tokens are
//!   parsed with `splitn(3, '.')` and the certificate survives intact.
//!
//! Temporary tokens use the same shape with `is_temporary: true`, carry a
//! `temp_user_id`/`original_username` pair instead of a usable public key,
//! and expire quickly. They scope a client to the recovery handshake only.

use crate::certificate::ApCertificate;
use crate::encoding;
use crate::error::{IdentityError, Result};
use serde::{Deserialize, Serialize};

/// Decoded token payload, shared by identity and temporary tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// AP that issued this token
    pub ap_id: String,

    /// Issuance time (RFC 3339)
    pub issued_at: String,

    /// The subject's username at the issuing AP. Absent on temporary
    /// tokens, which identify the caller by `temp_user_id` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// The subject's base64 Ed25519 public key, used to verify content
    /// signatures. Temporary tokens omit it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Marks a reduced-privilege recovery-handshake token
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_temporary: bool,

    /// Temporary user id of an in-progress cross-AP recovery session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_user_id: Option<String>,

    /// The username whose recovery this temporary token serves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_username: Option<String>,

    /// Expiry (RFC 3339); set on temporary tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl TokenPayload {
    /// Build an identity token payload
    pub fn identity(
        ap_id: impl Into<String>,
        username: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            ap_id: ap_id.into(),
            issued_at: chrono::Utc::now().to_rfc3339(),
            username: Some(username.into()),
            public_key: Some(public_key.into()),
            is_temporary: false,
            temp_user_id: None,
            original_username: None,
            expires_at: None,
        }
    }

    /// Build a temporary token payload for an in-progress recovery session
    pub fn temporary(
        ap_id: impl Into<String>,
        temp_user_id: impl Into<String>,
        original_username: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            ap_id: ap_id.into(),
            issued_at: now.to_rfc3339(),
            username: None,
            public_key: None,
            is_temporary: true,
            temp_user_id: Some(temp_user_id.into()),
            original_username: Some(original_username.into()),
            expires_at: Some((now + ttl).to_rfc3339()),
        }
    }

    /// The canonical string a token signature covers
    pub fn signing_string(&self) -> String {
        encoding::canonicalize(&serde_json::to_value(self).unwrap_or_default())
    }

    /// Whether the payload's expiry, if any, has passed
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match &self.expires_at {
            Some(exp) => chrono::DateTime::parse_from_rfc3339(exp)
                .map(|exp| now > exp)
                // Unparseable expiry counts as expired, not as eternal
                .unwrap_or(true),
            None => false,
        }
    }
}

/// A parsed token: payload, AP signature, optional AP certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityToken {
    /// Decoded payload
    pub payload: TokenPayload,
    /// Issuing AP's signature over the canonical payload
    pub signature: String,
    /// The issuing AP's root-issued certificate; identity tokens carry it,
    /// temporary tokens do not
    pub certificate: Option<ApCertificate>,
}

impl IdentityToken {
    /// Parse a token from its wire form.
    ///
    /// `splitn(3, '.')` keeps the dotted AP certificate as a single
    /// trailing segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, '.');
        let payload_segment = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| IdentityError::MalformedToken("empty token".into()))?;
        let signature = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IdentityError::MalformedToken("missing signature segment".into()))?
            .to_string();
        let certificate = match parts.next() {
            Some(cert) if !cert.is_empty() => Some(ApCertificate::parse(cert)?),
            _ => None,
        };

        let payload = serde_json::from_value(encoding::decode(payload_segment)?)
            .map_err(|e| IdentityError::MalformedToken(e.to_string()))?;

        Ok(Self {
            payload,
            signature,
            certificate,
        })
    }

    /// Render the token to its wire form
    pub fn to_wire(&self) -> String {
        let payload = serde_json::to_value(&self.payload).unwrap_or_default();
        match &self.certificate {
            Some(cert) => format!(
                "{}.{}.{}",
                encoding::encode(&payload),
                self.signature,
                cert.to_wire()
            ),
            None => format!("{}.{}", encoding::encode(&payload), self.signature),
        }
    }

    /// Verify the AP signature over the payload
    pub fn verify_signature(&self, ap_key: &crate::crypto::PublicKey) -> bool {
        ap_key.verify(&self.payload.signing_string(), &self.signature)
    }
}
