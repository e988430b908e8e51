//! Canonical encoding for signed payloads
//!
//! Every signature in the federation is made over the canonical JSON form of
//! a payload: object keys sorted, no added whitespace. Verification must
//! reproduce the signed bytes exactly, so both sides of every exchange go
//! through [`canonicalize`] and nothing else.
//!
//! Token segments on the wire are `base64(canonical-json)`; [`encode`] and
//! [`decode`] are the only functions that produce or consume them.

use crate::error::{IdentityError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

/// Produce the canonical serialization of a JSON payload.
///
/// serde_json orders object keys (BTreeMap-backed maps) and emits no
/// whitespace, so two structurally equal values always canonicalize to the
/// same bytes regardless of the key order they were built or parsed with.
pub fn canonicalize(payload: &Value) -> String {
    // Value -> String cannot fail: no non-string keys, no NaN floats enter
    // through our payload types.
    serde_json::to_string(payload).unwrap_or_default()
}

/// Encode a payload as a base64 token segment.
pub fn encode(payload: &Value) -> String {
    STANDARD.encode(canonicalize(payload).as_bytes())
}

/// Decode a base64 token segment back into its JSON payload.
///
/// Fails with [`IdentityError::MalformedEncoding`] on non-base64 input or a
/// non-JSON payload.
pub fn decode(segment: &str) -> Result<Value> {
    let bytes = STANDARD
        .decode(segment)
        .map_err(|e| IdentityError::MalformedEncoding(format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IdentityError::MalformedEncoding(format!("invalid payload JSON: {}", e)))
}
