//! Request authentication pipeline
//!
//! THIS IS THE HEART OF THE ACCESS POINT.
//!
//! Every inbound request passes through [`AuthGate::authenticate`], which
//! validates the signature chain user key → AP key → administrative root
//! and annotates the request with the outcome. The gate NEVER rejects: each
//! failure is captured into the [`AuthContext`] with a specific reason and
//! the request is forwarded, so per-route policy decides whether to reject
//! or degrade.
//!
//! Chain verification is three-valued: when the administrative root key is
//! unavailable the AP certificate is NOT_APPLICABLE, which is distinct from
//! both VALID and INVALID and must never be collapsed into a boolean.

pub mod blacklist;
pub mod middleware;

pub use blacklist::BlacklistGuard;

use crate::config::NodeConfig;
use crate::keys::KeyRegistry;
use relaypoint_core::certificate::DeviceCertificate;
use relaypoint_core::crypto::verify_with_encoded_key;
use relaypoint_core::encoding;
use relaypoint_core::token::{IdentityToken, TokenPayload};
use relaypoint_core::PublicKey;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Body field holding the caller's payload when it is signed
const CONTENT_FIELD: &str = "content";
/// Body field holding the content signature
const SIGNATURE_FIELD: &str = "signature";
/// Body field holding an optional device certificate
const DEVICE_CERTIFICATE_FIELD: &str = "device_certificate";

/// Three-valued verification outcome.
///
/// NOT_APPLICABLE means the check could not run (no root key configured,
/// or the step did not apply to this request). It is not a pass and not a
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verification {
    Valid,
    Invalid,
    NotApplicable,
}

/// Authentication failures, annotated into the request context.
///
/// The gate never throws these past its boundary - routing policy decides
/// what each one means for a given route.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("Missing authorization token")]
    MissingToken,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Token verification failed: {0}")]
    TokenVerificationFailed(String),

    #[error("Content signature verification failed: {0}")]
    ContentSignatureFailed(String),

    #[error("Device certificate key does not match token key")]
    CertificateKeyMismatch,

    #[error("Device identity is blacklisted: {0}")]
    Blacklisted(String),
}

/// Identity attached by a temporary recovery-handshake token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryIdentity {
    /// Temporary user id of the recovery session
    pub temp_user_id: String,
    /// Username whose recovery the session serves
    pub original_username: String,
}

/// The abstract request the gate consumes: method, path, header lookup and
/// the parsed JSON body. The gate never writes a response itself.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method
    pub method: http::Method,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: http::HeaderMap,
    /// Parsed JSON body, when present
    pub body: Option<Value>,
}

impl InboundRequest {
    /// Header lookup as UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Read methods skip content-signature verification
    pub fn is_read(&self) -> bool {
        matches!(
            self.method,
            http::Method::GET | http::Method::HEAD | http::Method::OPTIONS
        )
    }
}

/// Accumulated verification state attached to every forwarded request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Whether the bearer token's signature chain checked out
    pub token_verified: bool,
    /// Whether the body's content signature checked out (reads pass
    /// trivially)
    pub content_verified: bool,
    /// AP-certificate-vs-root outcome; three-valued, never a boolean
    pub ap_verified: Verification,
    /// Device-certificate-vs-root outcome, when a certificate was presented
    pub device_verified: Option<Verification>,
    /// Set when the caller authenticated with a temporary token
    pub temporary: Option<TemporaryIdentity>,
    /// Decoded token payload, when one parsed
    pub token: Option<TokenPayload>,
    /// The unwrapped `content` payload, when the body carried one
    pub content: Option<Value>,
    /// The specific failure, when verification did not succeed
    pub failure: Option<AuthFailure>,
    /// The path was on the public allowlist; nothing was verified
    pub public_route: bool,
    /// The unauthenticated liveness probe: no credentials yet, by design
    pub probe: bool,
}

impl AuthContext {
    fn unauthenticated() -> Self {
        Self {
            token_verified: false,
            content_verified: false,
            ap_verified: Verification::NotApplicable,
            device_verified: None,
            temporary: None,
            token: None,
            content: None,
            failure: None,
            public_route: false,
            probe: false,
        }
    }

    /// Whether the request carries a fully verified permanent identity
    pub fn fully_verified(&self) -> bool {
        self.token_verified
            && self.content_verified
            && self.temporary.is_none()
            && self.ap_verified != Verification::Invalid
            && self.failure.is_none()
    }

    /// The authenticated username, permanent or in-recovery
    pub fn username(&self) -> Option<&str> {
        if let Some(temp) = &self.temporary {
            return Some(&temp.original_username);
        }
        self.token.as_ref().and_then(|t| t.username.as_deref())
    }
}

/// Per-request authentication pipeline
#[derive(Debug, Clone)]
pub struct AuthGate {
    config: Arc<NodeConfig>,
    registry: Arc<KeyRegistry>,
    blacklist: BlacklistGuard,
}

impl AuthGate {
    /// Create the gate over the node's config, keys and blacklist
    pub fn new(config: Arc<NodeConfig>, registry: Arc<KeyRegistry>, blacklist: BlacklistGuard) -> Self {
        Self {
            config,
            registry,
            blacklist,
        }
    }

    /// Run the verification pipeline and annotate the outcome.
    ///
    /// The flow is:
    /// 1. Public-route allowlist passes untouched
    /// 2. Require the authorization header (probe path excepted)
    /// 3. Decode the token payload segment
    /// 4. Temporary tokens short-circuit to temporary authentication
    /// 5. Verify the AP certificate chain against the root key
    /// 6. Verify the content signature for mutating methods
    /// 7. Verify an optional device certificate and the blacklist
    /// 8. Unwrap `content` and attach the accumulated flags
    pub async fn authenticate(&self, request: &InboundRequest) -> AuthContext {
        let mut ctx = AuthContext::unauthenticated();

        // Step 1: public routes pass through with no verification
        if self.config.is_public_route(&request.path) {
            ctx.public_route = true;
            return ctx;
        }

        // Step 2: the authorization header is required everywhere else,
        // except the probe path, which passes flagged so the caller can
        // branch on "no credentials yet"
        let Some(raw_token) = request.header("authorization") else {
            if request.path == self.config.probe_path {
                ctx.probe = true;
                return ctx;
            }
            return self.fail(ctx, AuthFailure::MissingToken, request);
        };
        let raw_token = raw_token.strip_prefix("Bearer ").unwrap_or(raw_token);

        // Step 3: decode the token
        let token = match IdentityToken::parse(raw_token) {
            Ok(token) => token,
            Err(e) => {
                return self.fail(ctx, AuthFailure::MalformedToken(e.to_string()), request);
            }
        };

        // Step 4: temporary tokens skip chain, content and device checks;
        // they identify an in-progress recovery session, nothing more
        if token.payload.is_temporary {
            return self.authenticate_temporary(ctx, token, request);
        }

        // Step 5: verify the AP signature chain. The certificate proves the
        // AP's key to anyone holding the root key; without a root key the
        // outcome is NOT_APPLICABLE, not a failure.
        let Some(certificate) = token.certificate.clone() else {
            return self.fail(
                ctx,
                AuthFailure::TokenVerificationFailed("token carries no AP certificate".into()),
                request,
            );
        };

        if let Some(root) = self.registry.root_public_key() {
            if certificate.verify(root) {
                ctx.ap_verified = Verification::Valid;
            } else {
                ctx.ap_verified = Verification::Invalid;
                warn!(ap_id = %certificate.payload.ap_id, "AP certificate rejected by root key");
                return self.fail(
                    ctx,
                    AuthFailure::TokenVerificationFailed(
                        "AP certificate rejected by root key".into(),
                    ),
                    request,
                );
            }
        } else {
            ctx.ap_verified = Verification::NotApplicable;
        }

        let ap_key = match PublicKey::from_base64(&certificate.payload.public_key) {
            Ok(key) => key,
            Err(e) => {
                return self.fail(
                    ctx,
                    AuthFailure::TokenVerificationFailed(format!(
                        "AP certificate carries an unusable key: {}",
                        e
                    )),
                    request,
                );
            }
        };

        if !token.verify_signature(&ap_key) {
            warn!(ap_id = %token.payload.ap_id, "Token signature rejected");
            return self.fail(
                ctx,
                AuthFailure::TokenVerificationFailed("token signature invalid".into()),
                request,
            );
        }

        ctx.token_verified = true;
        ctx.token = Some(token.payload.clone());

        // Step 6: mutating methods must carry a signed content envelope;
        // the signature covers the canonical form of `content` and is made
        // with the key embedded in the token payload
        if request.is_read() {
            ctx.content_verified = true;
        } else {
            match self.verify_content(&token.payload, request) {
                Ok(()) => ctx.content_verified = true,
                Err(failure) => return self.fail(ctx, failure, request),
            }
        }

        // Step 7: optional device certificate
        if let Some(raw_cert) = request
            .body
            .as_ref()
            .and_then(|b| b.get(DEVICE_CERTIFICATE_FIELD))
            .and_then(Value::as_str)
        {
            let username = token.payload.username.as_deref().unwrap_or_default();
            if self
                .blacklist
                .is_blacklisted(username, &token.payload.ap_id)
                .await
            {
                let nickname = format!("{}@{}", username, token.payload.ap_id);
                warn!(nickname = %nickname, "Blacklisted device identity rejected");
                return self.fail(ctx, AuthFailure::Blacklisted(nickname), request);
            }

            match self.verify_device_certificate(raw_cert, &token.payload) {
                Ok(verified) => ctx.device_verified = Some(verified),
                Err(failure) => return self.fail(ctx, failure, request),
            }
        }

        // Step 8: unwrap the content envelope for the handler
        ctx.content = unwrap_content(request.body.as_ref());
        ctx
    }

    /// Step 4: temporary-token handling
    fn authenticate_temporary(
        &self,
        mut ctx: AuthContext,
        token: IdentityToken,
        request: &InboundRequest,
    ) -> AuthContext {
        if token.payload.is_expired(chrono::Utc::now()) {
            return self.fail(
                ctx,
                AuthFailure::TokenVerificationFailed("temporary token expired".into()),
                request,
            );
        }

        let (Some(temp_user_id), Some(original_username)) = (
            token.payload.temp_user_id.clone(),
            token.payload.original_username.clone(),
        ) else {
            return self.fail(
                ctx,
                AuthFailure::MalformedToken("temporary token missing session identity".into()),
                request,
            );
        };

        ctx.token_verified = true;
        ctx.ap_verified = Verification::NotApplicable;
        ctx.temporary = Some(TemporaryIdentity {
            temp_user_id,
            original_username,
        });
        ctx.token = Some(token.payload);
        ctx.content = unwrap_content(request.body.as_ref());
        ctx
    }

    /// Step 6: content-signature verification for mutating methods
    fn verify_content(
        &self,
        payload: &TokenPayload,
        request: &InboundRequest,
    ) -> Result<(), AuthFailure> {
        let body = request.body.as_ref().ok_or_else(|| {
            AuthFailure::ContentSignatureFailed("mutating request carries no body".into())
        })?;

        let content = body.get(CONTENT_FIELD).ok_or_else(|| {
            AuthFailure::ContentSignatureFailed("body carries no content envelope".into())
        })?;
        let signature = body
            .get(SIGNATURE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AuthFailure::ContentSignatureFailed("body carries no content signature".into())
            })?;

        let user_key = payload.public_key.as_deref().ok_or_else(|| {
            AuthFailure::ContentSignatureFailed("token payload carries no public key".into())
        })?;

        // The client signed the canonical form of `content`; reproduce it
        // byte-for-byte or nothing verifies
        let canonical = encoding::canonicalize(content);
        if !verify_with_encoded_key(&canonical, signature, user_key) {
            return Err(AuthFailure::ContentSignatureFailed(
                "signature does not match content".into(),
            ));
        }

        Ok(())
    }

    /// Step 7: device-certificate verification
    fn verify_device_certificate(
        &self,
        raw_cert: &str,
        payload: &TokenPayload,
    ) -> Result<Verification, AuthFailure> {
        let certificate = DeviceCertificate::parse(raw_cert)
            .map_err(|e| AuthFailure::MalformedToken(format!("device certificate: {}", e)))?;

        let Some(cert_key) = certificate.payload.public_key.as_deref() else {
            return Err(AuthFailure::CertificateKeyMismatch);
        };

        // The certificate key must byte-equal the key in the caller's
        // token, not merely be present
        if Some(cert_key) != payload.public_key.as_deref() {
            warn!(nickname = %certificate.nickname(), "Device certificate key mismatch");
            return Err(AuthFailure::CertificateKeyMismatch);
        }

        // Root verification mirrors step 5: recorded, and NOT_APPLICABLE
        // without a root key
        Ok(match self.registry.root_public_key() {
            Some(root) => {
                if certificate.verify(root) {
                    Verification::Valid
                } else {
                    warn!(nickname = %certificate.nickname(), "Device certificate rejected by root key");
                    Verification::Invalid
                }
            }
            None => Verification::NotApplicable,
        })
    }

    /// Annotate a failure and still unwrap `content`: the request is
    /// forwarded unauthenticated, never short-circuited here.
    fn fail(
        &self,
        mut ctx: AuthContext,
        failure: AuthFailure,
        request: &InboundRequest,
    ) -> AuthContext {
        ctx.content = unwrap_content(request.body.as_ref());
        ctx.failure = Some(failure);
        ctx
    }
}

/// Unwrap a `content` envelope; a body without one passes through as-is
fn unwrap_content(body: Option<&Value>) -> Option<Value> {
    let body = body?;
    match body.get(CONTENT_FIELD) {
        Some(content) => Some(content.clone()),
        None => Some(body.clone()),
    }
}

// =============================================================================
// Route Policy
// =============================================================================

/// Per-route authorization decision over an annotated context.
///
/// The gate only annotates; whether a given outcome is acceptable is a
/// separate, explicit decision made where the route is handled.
pub trait AuthPolicy: Send + Sync {
    /// Accept or reject an annotated request
    fn evaluate(&self, ctx: &AuthContext) -> Result<(), AuthFailure>;
}

/// Requires a fully verified permanent identity
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireFullAuth;

impl AuthPolicy for RequireFullAuth {
    fn evaluate(&self, ctx: &AuthContext) -> Result<(), AuthFailure> {
        if let Some(failure) = &ctx.failure {
            return Err(failure.clone());
        }
        if ctx.temporary.is_some() {
            // Temporary tokens grant no permanent-user privileges
            return Err(AuthFailure::TokenVerificationFailed(
                "temporary token not accepted on this route".into(),
            ));
        }
        if !ctx.fully_verified() {
            return Err(AuthFailure::TokenVerificationFailed(
                "request is not fully verified".into(),
            ));
        }
        Ok(())
    }
}

/// Accepts a fully verified identity or a live temporary token; used by the
/// recovery endpoints, which additionally validate the recovery-secret hash
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowTemporary;

impl AuthPolicy for AllowTemporary {
    fn evaluate(&self, ctx: &AuthContext) -> Result<(), AuthFailure> {
        if let Some(failure) = &ctx.failure {
            return Err(failure.clone());
        }
        if ctx.temporary.is_some() || ctx.fully_verified() {
            return Ok(());
        }
        Err(AuthFailure::TokenVerificationFailed(
            "request is not verified".into(),
        ))
    }
}
