//! axum adapter for the authentication pipeline
//!
//! Buffers the JSON body, runs [`AuthGate::authenticate`] and attaches the
//! resulting [`AuthContext`] to the request's extensions. The original body
//! bytes are restored so extractors downstream still work; handlers that
//! want the unwrapped `content` read it from the context.

use crate::api::AppState;
use crate::auth::InboundRequest;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Largest request body the gate will buffer
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Tower middleware running the authentication pipeline on every request
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let body_json = if bytes.is_empty() {
        None
    } else {
        // A non-JSON body is passed through unparsed; the gate treats it
        // like an absent body and mutating routes fail content checks.
        serde_json::from_slice(&bytes).ok()
    };

    let inbound = InboundRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: body_json,
    };

    let ctx = state.auth_gate.authenticate(&inbound).await;
    parts.extensions.insert(ctx);

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}
