//! Integration Tests for the Authentication Pipeline
//!
//! These tests drive the full gate over constructed requests:
//! - The happy path: token chain and content signature both verify
//! - Flag independence: one flipped signature flips exactly its own flag
//! - Temporary tokens: bypass content verification, carry session identity
//! - Device certificates: key binding, root verification, blacklist
//! - The three-valued chain outcome when no root key is configured

use base64::{engine::general_purpose::STANDARD, Engine};
use relaypoint_core::certificate::DeviceCertificate;
use relaypoint_core::{encoding, ApCertificate, KeyPair};
use relaypoint_node::auth::{AuthContext, AuthFailure, InboundRequest, Verification};
use relaypoint_node::storage::BlacklistedDevice;
use relaypoint_node::{build_state, AppState, KeyRegistry, MemoryStore, NodeConfig, Store};
use serde_json::{json, Value};
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

/// A test Access Point whose administrative root key is kept around so the
/// tests can mint device certificates and forge rivals.
struct TestAp {
    state: Arc<AppState>,
    root: KeyPair,
}

fn test_ap(ap_id: &str) -> TestAp {
    let root = KeyPair::generate();
    let ap_keys = KeyPair::generate();
    let certificate = ApCertificate::issue(&root, ap_id, &ap_keys.public_key());
    let registry = KeyRegistry::new(ap_id, ap_keys, Some(certificate), Some(root.public_key()));

    let config = NodeConfig {
        ap_id: ap_id.to_string(),
        ..NodeConfig::default()
    };
    let store = Arc::new(MemoryStore::new());

    TestAp {
        state: build_state(config, registry, store),
        root,
    }
}

fn bearer_headers(token: &str) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    headers
}

/// A signed mutating request the way a client builds one: the signature
/// covers the canonical form of `content`.
fn signed_post(token: &str, user: &KeyPair, content: Value) -> InboundRequest {
    let signature = user.sign(&encoding::canonicalize(&content));
    InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(token),
        body: Some(json!({ "content": content, "signature": signature })),
    }
}

async fn authenticate(ap: &TestAp, request: &InboundRequest) -> AuthContext {
    ap.state.auth_gate.authenticate(request).await
}

/// Flip one byte inside a base64 string's decoded form
fn flip_byte(encoded: &str, index: usize) -> String {
    let mut bytes = STANDARD.decode(encoded).unwrap();
    bytes[index] ^= 0xFF;
    STANDARD.encode(bytes)
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn alice_posts_hi_and_both_flags_verify() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    let ctx = authenticate(&ap, &signed_post(&token, &alice, json!({ "msg": "hi" }))).await;

    assert!(ctx.token_verified);
    assert!(ctx.content_verified);
    assert_eq!(ctx.ap_verified, Verification::Valid);
    assert!(ctx.failure.is_none());
    assert_eq!(ctx.username(), Some("alice"));
    assert_eq!(ctx.content, Some(json!({ "msg": "hi" })));
}

#[tokio::test]
async fn trailing_space_fails_content_signature() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    // Signature computed over {"msg":"hi"}, content sent as {"msg":"hi "}
    let signature = alice.sign(&encoding::canonicalize(&json!({ "msg": "hi" })));
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({ "content": { "msg": "hi " }, "signature": signature })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert!(matches!(
        ctx.failure,
        Some(AuthFailure::ContentSignatureFailed(_))
    ));
    assert!(!ctx.content_verified);
    // The other flags are unaffected by a content failure
    assert!(ctx.token_verified);
    assert_eq!(ctx.ap_verified, Verification::Valid);
}

// =============================================================================
// Flag Independence Under Signature Flips
// =============================================================================

#[tokio::test]
async fn flipped_token_signature_flips_only_token_flag() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    // token wire: payload.signature.cert_payload.cert_sig
    let mut parts: Vec<&str> = token.splitn(3, '.').collect();
    let flipped = flip_byte(parts[1], 0);
    parts[1] = &flipped;
    let tampered = parts.join(".");

    let ctx = authenticate(&ap, &signed_post(&tampered, &alice, json!({ "msg": "hi" }))).await;

    assert!(!ctx.token_verified);
    assert!(matches!(
        ctx.failure,
        Some(AuthFailure::TokenVerificationFailed(_))
    ));
    // The certificate itself still verified against the root
    assert_eq!(ctx.ap_verified, Verification::Valid);
}

#[tokio::test]
async fn flipped_certificate_signature_invalidates_chain() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    // The certificate is the third splitn segment: cert_payload.cert_sig
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    let cert_parts: Vec<&str> = parts[2].split('.').collect();
    let flipped_cert_sig = flip_byte(cert_parts[1], 0);
    let tampered = format!(
        "{}.{}.{}.{}",
        parts[0], parts[1], cert_parts[0], flipped_cert_sig
    );

    let ctx = authenticate(&ap, &signed_post(&tampered, &alice, json!({ "msg": "hi" }))).await;

    assert_eq!(ctx.ap_verified, Verification::Invalid);
    assert!(matches!(
        ctx.failure,
        Some(AuthFailure::TokenVerificationFailed(_))
    ));
}

#[tokio::test]
async fn flipped_content_signature_flips_only_content_flag() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    let content = json!({ "msg": "hi" });
    let signature = flip_byte(&alice.sign(&encoding::canonicalize(&content)), 0);
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({ "content": content, "signature": signature })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert!(!ctx.content_verified);
    assert!(ctx.token_verified);
    assert_eq!(ctx.ap_verified, Verification::Valid);
    assert!(matches!(
        ctx.failure,
        Some(AuthFailure::ContentSignatureFailed(_))
    ));
}

// =============================================================================
// Temporary Tokens
// =============================================================================

#[tokio::test]
async fn temporary_token_bypasses_content_verification() {
    let ap = test_ap("ap-a");
    let token = ap.state.issuer.issue_temporary_token("tmp-t1", "alice");

    // No signature in the body at all; a permanent token would fail here
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/recovery/cross/tmp-t1".into(),
        headers: bearer_headers(&token),
        body: Some(json!({ "content": { "poll": true } })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert!(ctx.failure.is_none());
    let temp = ctx.temporary.expect("temporary identity attached");
    assert_eq!(temp.temp_user_id, "tmp-t1");
    assert_eq!(temp.original_username, "alice");
    assert_eq!(ctx.content, Some(json!({ "poll": true })));
    assert_eq!(ctx.ap_verified, Verification::NotApplicable);
}

#[tokio::test]
async fn expired_temporary_token_rejected() {
    let root = KeyPair::generate();
    let ap_keys = KeyPair::generate();
    let certificate = ApCertificate::issue(&root, "ap-a", &ap_keys.public_key());
    let registry = KeyRegistry::new("ap-a", ap_keys, Some(certificate), Some(root.public_key()));
    let config = NodeConfig {
        ap_id: "ap-a".into(),
        temporary_token_ttl: chrono::Duration::minutes(-1),
        ..NodeConfig::default()
    };
    let state = build_state(config, registry, Arc::new(MemoryStore::new()));

    let token = state.issuer.issue_temporary_token("tmp-t1", "alice");
    let request = InboundRequest {
        method: http::Method::GET,
        path: "/v1/recovery/cross/tmp-t1".into(),
        headers: bearer_headers(&token),
        body: None,
    };

    let ctx = state.auth_gate.authenticate(&request).await;

    assert!(matches!(
        ctx.failure,
        Some(AuthFailure::TokenVerificationFailed(_))
    ));
    assert!(ctx.temporary.is_none());
}

// =============================================================================
// Device Certificates
// =============================================================================

#[tokio::test]
async fn device_certificate_with_matching_key_verifies() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    let device_cert = DeviceCertificate::issue(&ap.root, "alice", "ap-a", &alice.public_key());

    let content = json!({ "msg": "hi" });
    let signature = alice.sign(&encoding::canonicalize(&content));
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({
            "content": content,
            "signature": signature,
            "device_certificate": device_cert.to_wire(),
        })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert!(ctx.failure.is_none());
    assert_eq!(ctx.device_verified, Some(Verification::Valid));
}

#[tokio::test]
async fn device_certificate_key_mismatch_rejected() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let other_device = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    // Certificate for a different key than the one in alice's token
    let device_cert =
        DeviceCertificate::issue(&ap.root, "alice", "ap-a", &other_device.public_key());

    let content = json!({ "msg": "hi" });
    let signature = alice.sign(&encoding::canonicalize(&content));
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({
            "content": content,
            "signature": signature,
            "device_certificate": device_cert.to_wire(),
        })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert_eq!(ctx.failure, Some(AuthFailure::CertificateKeyMismatch));
    assert!(ctx.device_verified.is_none());
}

#[tokio::test]
async fn blacklisted_device_identity_rejected() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    ap.state
        .store
        .add_blacklisted(BlacklistedDevice {
            nickname: "alice@ap-a".into(),
            reason: Some("compromised device".into()),
            added_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let device_cert = DeviceCertificate::issue(&ap.root, "alice", "ap-a", &alice.public_key());
    let content = json!({ "msg": "hi" });
    let signature = alice.sign(&encoding::canonicalize(&content));
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({
            "content": content,
            "signature": signature,
            "device_certificate": device_cert.to_wire(),
        })),
    };

    let ctx = authenticate(&ap, &request).await;

    assert_eq!(
        ctx.failure,
        Some(AuthFailure::Blacklisted("alice@ap-a".into()))
    );
}

#[tokio::test]
async fn blacklist_only_applies_when_certificate_presented() {
    let ap = test_ap("ap-a");
    let alice = KeyPair::generate();
    let token = ap
        .state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    ap.state
        .store
        .add_blacklisted(BlacklistedDevice {
            nickname: "alice@ap-a".into(),
            reason: None,
            added_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    // Without a device certificate the blacklist step does not run
    let ctx = authenticate(&ap, &signed_post(&token, &alice, json!({ "msg": "hi" }))).await;
    assert!(ctx.failure.is_none());
}

// =============================================================================
// Degraded Chain (No Root Key)
// =============================================================================

#[tokio::test]
async fn missing_root_key_yields_not_applicable_not_failure() {
    let root = KeyPair::generate();
    let ap_keys = KeyPair::generate();
    let certificate = ApCertificate::issue(&root, "ap-a", &ap_keys.public_key());
    // Root public key NOT configured on this node
    let registry = KeyRegistry::new("ap-a", ap_keys, Some(certificate), None);
    let state = build_state(
        NodeConfig {
            ap_id: "ap-a".into(),
            ..NodeConfig::default()
        },
        registry,
        Arc::new(MemoryStore::new()),
    );

    let alice = KeyPair::generate();
    let token = state
        .issuer
        .issue_identity_token("alice", &alice.public_key().to_base64());

    let content = json!({ "msg": "hi" });
    let signature = alice.sign(&encoding::canonicalize(&content));
    let request = InboundRequest {
        method: http::Method::POST,
        path: "/v1/messages".into(),
        headers: bearer_headers(&token),
        body: Some(json!({ "content": content, "signature": signature })),
    };

    let ctx = state.auth_gate.authenticate(&request).await;

    // Chain verification is NOT-YET-APPLICABLE: a third state, not a bool
    assert_eq!(ctx.ap_verified, Verification::NotApplicable);
    assert!(ctx.token_verified, "token still verifies via claimed AP key");
    assert!(ctx.content_verified);
    assert!(ctx.failure.is_none());
}
