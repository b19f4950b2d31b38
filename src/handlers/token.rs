//! `POST /auth/token`
//!
//! Mints a fresh short-lived credential with the server-held API key on every
//! call. The key itself never appears in a response.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use crate::core::credentials::{TokenResponse, format_timestamp};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Issue a credential for one realtime session.
///
/// Answers `200 {success, token, expiry, expireTime}` where `expiry` is the
/// configured lifetime in minutes. Issuer failures answer 500.
pub async fn issue_token(State(state): State<Arc<AppState>>) -> AppResult<Json<TokenResponse>> {
    let credential = state.issuer.issue(&state.token_request).await?;

    info!(
        "Issued credential {} ({}s lifetime)",
        credential.redacted(),
        state.token_request.lifetime.whole_seconds()
    );

    let expire_time = format_timestamp(credential.expires_at)?;

    Ok(Json(TokenResponse {
        success: true,
        token: Some(credential.token.clone()),
        expiry: Some(state.config.token_expire_minutes),
        expire_time: Some(expire_time),
        ..Default::default()
    }))
}

/// Bare `OPTIONS` requests that are not CORS preflights.
pub async fn preflight() -> impl IntoResponse {
    StatusCode::OK
}

/// Any method other than POST or OPTIONS.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
