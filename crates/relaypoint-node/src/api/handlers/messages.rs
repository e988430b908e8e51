//! Message submission handler
//!
//! The representative mutating route: it demonstrates the full verification
//! chain end to end. The auth middleware has already annotated the request;
//! this handler applies the strict policy and reads the unwrapped content
//! from the context.

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::auth::{AuthContext, AuthPolicy, RequireFullAuth, Verification};

/// Acknowledgement of an accepted message
#[derive(Debug, Serialize)]
pub struct PostMessageResponse {
    /// Whether the message was accepted
    pub accepted: bool,
    /// Verified sender
    pub from: String,
    /// AP-certificate verification outcome for the sender's token
    pub ap_verified: Verification,
    /// Device-certificate verification outcome, when one was presented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_verified: Option<Verification>,
}

/// Accept a message from a fully verified sender
///
/// POST /v1/messages
pub async fn post_message(
    State(_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<PostMessageResponse>, ApiError> {
    RequireFullAuth.evaluate(&ctx).map_err(ApiError::from)?;

    let from = ctx
        .username()
        .ok_or_else(|| ApiError::Unauthorized("token carries no username".into()))?
        .to_string();

    let content = ctx
        .content
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("message carries no content".into()))?;

    info!(from = %from, bytes = content.to_string().len(), "Accepted message");

    Ok(Json(PostMessageResponse {
        accepted: true,
        from,
        ap_verified: ctx.ap_verified,
        device_verified: ctx.device_verified,
    }))
}
