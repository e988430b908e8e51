//! Integration Tests for the Recovery Flows
//!
//! Same-AP and cross-AP lifecycles end to end, including:
//! - The sealed credential payload opening only under the ephemeral key
//! - At-most-one-response semantics under concurrent submission
//! - Lazy expiry observed by readers that never touched the row before
//! - Attempt counting and lockout on the destination AP

use futures::future::join_all;
use relaypoint_core::crypto::{hash_recovery_secret, EphemeralKeyPair};
use relaypoint_core::{ApCertificate, KeyPair};
use relaypoint_node::recovery::cross_ap::{
    response_signing_string, CredentialClaim, InitiateCrossRecovery,
};
use relaypoint_node::recovery::local::{initiate_signing_string, InitiateRecovery};
use relaypoint_node::recovery::RecoveryError;
use relaypoint_node::storage::User;
use relaypoint_node::{
    build_state, AppState, KeyRegistry, MemoryStore, NodeConfig, RecoveryStatus, Store,
};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

fn test_node(ap_id: &str, config: NodeConfig) -> Arc<AppState> {
    let root = KeyPair::generate();
    let ap_keys = KeyPair::generate();
    let certificate = ApCertificate::issue(&root, ap_id, &ap_keys.public_key());
    let registry = KeyRegistry::new(ap_id, ap_keys, Some(certificate), Some(root.public_key()));
    build_state(
        NodeConfig {
            ap_id: ap_id.to_string(),
            ..config
        },
        registry,
        Arc::new(MemoryStore::new()),
    )
}

/// Register alice with an enrolled recovery secret; returns her presented
/// secret hash (what a client reproduces from secret + salt).
async fn enroll_alice(node: &Arc<AppState>, secret: &str) -> String {
    let mut user = User::new("alice", KeyPair::generate().public_key().to_base64());
    let salt = relaypoint_node::recovery::account::enroll_recovery_secret(
        &mut user,
        secret,
        chrono::Utc::now(),
    );
    user.escrowed_credentials = Some("opaque-escrow-blob".into());
    node.store.put_user(user).await.unwrap();
    hash_recovery_secret(secret, &salt)
}

/// Build an initiation signed by the requesting AP (here: the node itself,
/// relaying for a locked-out client), sealing to the given ephemeral key.
fn ap_signed_initiate(
    node: &Arc<AppState>,
    username: &str,
    source_ap: &str,
    ephemeral: &EphemeralKeyPair,
    secret_hash: Option<String>,
) -> InitiateRecovery {
    let mut params = InitiateRecovery {
        username: username.into(),
        source_ap_id: source_ap.into(),
        requesting_ap_id: node.registry.ap_id().to_string(),
        ephemeral_public_key: ephemeral.public_key_base64(),
        recovery_secret_hash: secret_hash,
        requester_signature: String::new(),
    };
    params.requester_signature = node.registry.sign(&initiate_signing_string(&params));
    params
}

// =============================================================================
// Same-AP Recovery
// =============================================================================

#[tokio::test]
async fn local_recovery_initiate_verifies_requester_signature() {
    let node = test_node("ap-a", NodeConfig::default());
    let ephemeral = EphemeralKeyPair::generate();

    let params = ap_signed_initiate(&node, "alice", "ap-a", &ephemeral, None);
    let request = node.recovery.initiate(params).await.unwrap();
    assert_eq!(request.status, RecoveryStatus::Pending);

    // A tampered signature is rejected with the specific error kind
    let mut bad = ap_signed_initiate(&node, "alice", "ap-a", &ephemeral, None);
    bad.requester_signature = "AAAA".into();
    let result = node.recovery.initiate(bad).await;
    assert!(matches!(result, Err(RecoveryError::InvalidSignature(_))));

    // A signature from an unregistered AP cannot be verified at all
    let mut foreign = ap_signed_initiate(&node, "alice", "ap-a", &ephemeral, None);
    foreign.requesting_ap_id = "ap-unknown".into();
    let result = node.recovery.initiate(foreign).await;
    assert!(matches!(result, Err(RecoveryError::UnknownPeerAp(_))));
}

#[tokio::test]
async fn local_release_seals_credentials_for_requester() {
    let node = test_node("ap-a", NodeConfig::default());
    let secret_hash = enroll_alice(&node, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let params = ap_signed_initiate(&node, "alice", "ap-a", &receive_keys, Some(secret_hash));
    let request = node.recovery.initiate(params).await.unwrap();

    let response = node.recovery.release(&request.id).await.unwrap();
    assert_eq!(response.source_ap_id, "ap-a");

    // Only the holder of the ephemeral secret can open the payload
    let opened = receive_keys.open(&response.encrypted_user_data).unwrap();
    let bundle: Value = serde_json::from_slice(&opened).unwrap();
    assert_eq!(bundle["username"], "alice");
    assert_eq!(bundle["escrowed_credentials"], "opaque-escrow-blob");

    // The request flipped to COMPLETED and the response is fetchable
    let stored = node
        .store
        .get_recovery_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryStatus::Completed);
    let fetched = node.recovery.fetch(&request.id).await.unwrap();
    assert_eq!(fetched.encrypted_user_data, response.encrypted_user_data);
}

#[tokio::test]
async fn local_release_wrong_secret_rejected() {
    let node = test_node("ap-a", NodeConfig::default());
    enroll_alice(&node, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let params = ap_signed_initiate(
        &node,
        "alice",
        "ap-a",
        &receive_keys,
        Some("wrong-hash".into()),
    );
    let request = node.recovery.initiate(params).await.unwrap();

    let result = node.recovery.release(&request.id).await;
    assert!(matches!(result, Err(RecoveryError::SecretMismatch)));

    // The failed attempt was recorded on the account
    let user = node.store.get_user("alice").await.unwrap().unwrap();
    assert_eq!(user.failed_attempts, 1);

    // The request is still PENDING: the client may retry within policy
    let stored = node
        .store
        .get_recovery_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryStatus::Pending);
}

#[tokio::test]
async fn local_respond_is_at_most_once() {
    let node = test_node("ap-a", NodeConfig::default());
    enroll_alice(&node, "correct horse").await;

    let ephemeral = EphemeralKeyPair::generate();
    let params = ap_signed_initiate(&node, "alice", "ap-a", &ephemeral, None);
    let request = node.recovery.initiate(params).await.unwrap();

    let canonical = relaypoint_node::recovery::local::response_signing_string(
        &request.id,
        "sealed-data",
        "ap-a",
        "ap-a",
    );
    let signature = node.registry.sign(&canonical);

    node.recovery
        .respond(&request.id, "sealed-data".into(), "ap-a".into(), signature.clone())
        .await
        .unwrap();

    // A second response for the same id fails with AlreadyResponded
    let result = node
        .recovery
        .respond(&request.id, "sealed-data".into(), "ap-a".into(), signature)
        .await;
    assert!(matches!(result, Err(RecoveryError::AlreadyResponded)));

    // fetch is idempotent
    let fetched = node.recovery.fetch(&request.id).await.unwrap();
    assert_eq!(fetched.encrypted_user_data, "sealed-data");
    let fetched_again = node.recovery.fetch(&request.id).await.unwrap();
    assert_eq!(fetched_again.request_id, fetched.request_id);
}

#[tokio::test]
async fn local_respond_after_expiry_fails() {
    let node = test_node(
        "ap-a",
        NodeConfig {
            recovery_ttl: chrono::Duration::minutes(-1),
            ..NodeConfig::default()
        },
    );

    let ephemeral = EphemeralKeyPair::generate();
    let params = ap_signed_initiate(&node, "alice", "ap-a", &ephemeral, None);
    let request = node.recovery.initiate(params).await.unwrap();

    // The stored row is still PENDING but observed status is EXPIRED
    let canonical = relaypoint_node::recovery::local::response_signing_string(
        &request.id,
        "sealed",
        "ap-a",
        "ap-a",
    );
    let signature = node.registry.sign(&canonical);
    let result = node
        .recovery
        .respond(&request.id, "sealed".into(), "ap-a".into(), signature)
        .await;

    assert!(matches!(result, Err(RecoveryError::RequestExpired)));
}

#[tokio::test]
async fn local_fetch_unknown_request_is_not_found() {
    let node = test_node("ap-a", NodeConfig::default());
    let result = node.recovery.fetch("no-such-request").await;
    assert!(matches!(result, Err(RecoveryError::NotFound(_))));
}

// =============================================================================
// Cross-AP Recovery
// =============================================================================

/// The full happy path between two nodes: B opens the session, A releases
/// sealed credentials after the secret hash verifies, B accepts exactly one
/// response, the client opens the box.
#[tokio::test]
async fn cross_ap_recovery_end_to_end() {
    let node_a = test_node("ap-a", NodeConfig::default()); // destination: holds alice
    let node_b = test_node("ap-b", NodeConfig::default()); // requesting: alice's new AP

    // B trusts A's key via federation peer exchange
    node_b
        .registry
        .register_peer("ap-a".into(), node_a.registry.ap_public_key());

    let secret_hash = enroll_alice(&node_a, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    // Step 1: client opens the session at B under a temporary id
    let ticket = node_b
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: "ap-b".into(),
            destination_ap_id: "ap-a".into(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash.clone(),
            ephemeral_public_key: receive_keys.public_key_base64(),
        })
        .await
        .unwrap();
    assert!(ticket.temp_user_id.starts_with("tmp-"));
    assert_ne!(ticket.temp_user_id, "alice", "temp id never a real identity");

    // Step 2: A verifies the secret hash and releases sealed credentials
    let release = node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: ticket.temp_user_id.clone(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash.clone(),
            ephemeral_public_key: receive_keys.public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await
        .unwrap();
    assert_eq!(release.source_ap_id, "ap-a");

    // Step 3: B accepts the response after checking A's signature
    node_b
        .cross_recovery
        .submit_response(
            &ticket.temp_user_id,
            release.encrypted_user_data.clone(),
            release.source_ap_id.clone(),
            release.source_ap_signature.clone(),
        )
        .await
        .unwrap();

    // Step 4: the client polls COMPLETED and opens the sealed payload
    let outcome = node_b.cross_recovery.poll(&ticket.temp_user_id).await.unwrap();
    assert_eq!(outcome.status, RecoveryStatus::Completed);
    let sealed = outcome.response_data.expect("payload cached on completion");

    let opened = receive_keys.open(&sealed).expect("client can open the box");
    let bundle: Value = serde_json::from_slice(&opened).unwrap();
    assert_eq!(bundle["username"], "alice");
    assert_eq!(bundle["escrowed_credentials"], "opaque-escrow-blob");

    // B's store never saw the plaintext: only the sealed blob is cached
    let session = node_b
        .store
        .get_cross_session(&ticket.temp_user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.response_data.as_deref(), Some(sealed.as_str()));
    assert!(session.response_received);
}

#[tokio::test]
async fn cross_ap_duplicate_submission_already_completed() {
    let node_a = test_node("ap-a", NodeConfig::default());
    let node_b = test_node("ap-b", NodeConfig::default());
    node_b
        .registry
        .register_peer("ap-a".into(), node_a.registry.ap_public_key());

    let secret_hash = enroll_alice(&node_a, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let ticket = node_b
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: "ap-b".into(),
            destination_ap_id: "ap-a".into(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash.clone(),
            ephemeral_public_key: receive_keys.public_key_base64(),
        })
        .await
        .unwrap();

    let release = node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: ticket.temp_user_id.clone(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash,
            ephemeral_public_key: receive_keys.public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await
        .unwrap();

    node_b
        .cross_recovery
        .submit_response(
            &ticket.temp_user_id,
            release.encrypted_user_data.clone(),
            release.source_ap_id.clone(),
            release.source_ap_signature.clone(),
        )
        .await
        .unwrap();

    // B submits again: the session is terminal
    let result = node_b
        .cross_recovery
        .submit_response(
            &ticket.temp_user_id,
            release.encrypted_user_data,
            release.source_ap_id,
            release.source_ap_signature,
        )
        .await;
    assert!(matches!(result, Err(RecoveryError::AlreadyCompleted)));
}

#[tokio::test]
async fn cross_ap_concurrent_submissions_have_one_winner() {
    let node_a = test_node("ap-a", NodeConfig::default());
    let node_b = test_node("ap-b", NodeConfig::default());
    node_b
        .registry
        .register_peer("ap-a".into(), node_a.registry.ap_public_key());

    let secret_hash = enroll_alice(&node_a, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let ticket = node_b
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: "ap-b".into(),
            destination_ap_id: "ap-a".into(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash.clone(),
            ephemeral_public_key: receive_keys.public_key_base64(),
        })
        .await
        .unwrap();

    let release = node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: ticket.temp_user_id.clone(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash,
            ephemeral_public_key: receive_keys.public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await
        .unwrap();

    // Eight racing submissions of the same (valid) response
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let node = node_b.clone();
            let temp_id = ticket.temp_user_id.clone();
            let data = release.encrypted_user_data.clone();
            let source = release.source_ap_id.clone();
            let signature = release.source_ap_signature.clone();
            tokio::spawn(async move {
                node.cross_recovery
                    .submit_response(&temp_id, data, source, signature)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(RecoveryError::AlreadyCompleted)))
        .count();

    assert_eq!(winners, 1, "exactly one submission completes the session");
    assert_eq!(losers, results.len() - 1);
}

#[tokio::test]
async fn cross_ap_poll_reports_expired_without_prior_read() {
    let node_b = test_node(
        "ap-b",
        NodeConfig {
            cross_recovery_ttl: chrono::Duration::minutes(-1),
            ..NodeConfig::default()
        },
    );

    let ticket = node_b
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: "ap-b".into(),
            destination_ap_id: "ap-a".into(),
            username: "alice".into(),
            recovery_secret_hash: "hash".into(),
            ephemeral_public_key: EphemeralKeyPair::generate().public_key_base64(),
        })
        .await
        .unwrap();

    // First-ever read observes EXPIRED: expiry is a pure function of now
    // and expires_at, not a side-effecting write
    let outcome = node_b.cross_recovery.poll(&ticket.temp_user_id).await.unwrap();
    assert_eq!(outcome.status, RecoveryStatus::Expired);
    assert!(outcome.response_data.is_none());

    // The stored row was not rewritten
    let stored = node_b
        .store
        .get_cross_session(&ticket.temp_user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryStatus::Pending);

    // Every subsequent reader observes the same thing
    let again = node_b.cross_recovery.poll(&ticket.temp_user_id).await.unwrap();
    assert_eq!(again.status, RecoveryStatus::Expired);
}

#[tokio::test]
async fn cross_ap_submission_after_expiry_fails() {
    let node_b = test_node(
        "ap-b",
        NodeConfig {
            cross_recovery_ttl: chrono::Duration::minutes(-1),
            ..NodeConfig::default()
        },
    );

    let ticket = node_b
        .cross_recovery
        .initiate(InitiateCrossRecovery {
            requesting_ap_id: "ap-b".into(),
            destination_ap_id: "ap-a".into(),
            username: "alice".into(),
            recovery_secret_hash: "hash".into(),
            ephemeral_public_key: EphemeralKeyPair::generate().public_key_base64(),
        })
        .await
        .unwrap();

    let result = node_b
        .cross_recovery
        .submit_response(&ticket.temp_user_id, "data".into(), "ap-a".into(), "sig".into())
        .await;
    assert!(matches!(result, Err(RecoveryError::RequestExpired)));
}

// =============================================================================
// Destination-Side Verification
// =============================================================================

#[tokio::test]
async fn wrong_secret_counts_attempts_and_locks() {
    let config = NodeConfig::default();
    let max_attempts = config.max_recovery_attempts;
    let node_a = test_node("ap-a", config);
    let correct_hash = enroll_alice(&node_a, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let claim = |hash: String| CredentialClaim {
        temp_user_id: "tmp-x".into(),
        username: "alice".into(),
        recovery_secret_hash: hash,
        ephemeral_public_key: receive_keys.public_key_base64(),
        requesting_ap_id: "ap-b".into(),
    };

    for attempt in 1..=max_attempts {
        let result = node_a
            .cross_recovery
            .release_credentials(claim("wrong-hash".into()))
            .await;
        assert!(
            matches!(result, Err(RecoveryError::SecretMismatch)),
            "attempt {} should mismatch",
            attempt
        );
    }

    let user = node_a.store.get_user("alice").await.unwrap().unwrap();
    assert!(user.locked);
    assert_eq!(user.failed_attempts, max_attempts);

    // Even the correct secret is refused while locked
    let result = node_a
        .cross_recovery
        .release_credentials(claim(correct_hash))
        .await;
    assert!(matches!(result, Err(RecoveryError::AccountLocked(_))));
}

#[tokio::test]
async fn unknown_account_reads_as_secret_mismatch() {
    let node_a = test_node("ap-a", NodeConfig::default());

    let result = node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: "tmp-x".into(),
            username: "nobody".into(),
            recovery_secret_hash: "hash".into(),
            ephemeral_public_key: EphemeralKeyPair::generate().public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await;

    // Account existence is not leaked: same error kind as a wrong secret
    assert!(matches!(result, Err(RecoveryError::SecretMismatch)));
}

#[tokio::test]
async fn successful_release_records_provenance() {
    let node_a = test_node("ap-a", NodeConfig::default());
    let secret_hash = enroll_alice(&node_a, "correct horse").await;

    node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: "tmp-x".into(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash,
            ephemeral_public_key: EphemeralKeyPair::generate().public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await
        .unwrap();

    let user = node_a.store.get_user("alice").await.unwrap().unwrap();
    assert_eq!(user.successful_recoveries, 1);
    assert_eq!(user.failed_attempts, 0);
    assert_eq!(user.recovery_source_ap.as_deref(), Some("ap-b"));
    assert!(user.recovery_signature.is_some());
}

#[tokio::test]
async fn release_signature_verifies_against_peer_key() {
    let node_a = test_node("ap-a", NodeConfig::default());
    let secret_hash = enroll_alice(&node_a, "correct horse").await;
    let receive_keys = EphemeralKeyPair::generate();

    let release = node_a
        .cross_recovery
        .release_credentials(CredentialClaim {
            temp_user_id: "tmp-x".into(),
            username: "alice".into(),
            recovery_secret_hash: secret_hash,
            ephemeral_public_key: receive_keys.public_key_base64(),
            requesting_ap_id: "ap-b".into(),
        })
        .await
        .unwrap();

    let canonical = response_signing_string(
        "tmp-x",
        &release.encrypted_user_data,
        "ap-b",
        "ap-a",
    );
    assert!(node_a
        .registry
        .ap_public_key()
        .verify(&canonical, &release.source_ap_signature));
}
