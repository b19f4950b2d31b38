//! HTTP-facing error type.
//!
//! Every failure leaving a handler is rendered with the same JSON shape the
//! token endpoint uses for success, with `success: false`:
//!
//! ```json
//! {"success": false, "error": "API error", "httpCode": 403, "response": {...}}
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::core::credentials::{IssuanceError, IssuanceFailureReason, TokenResponse};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("credential issuance failed: {0}")]
    Issuance(#[from] IssuanceError),

    #[error("Method not allowed. Use POST.")]
    MethodNotAllowed,

    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Issuance(_) | AppError::Timestamp(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> TokenResponse {
        let mut body = TokenResponse {
            success: false,
            ..Default::default()
        };

        match self {
            AppError::Issuance(err) => match err.reason {
                IssuanceFailureReason::Transport => {
                    body.error = Some(format!("Request failed: {}", err.detail));
                }
                IssuanceFailureReason::Status(code) => {
                    body.error = Some("API error".to_string());
                    body.http_code = Some(code);
                    body.response = Some(upstream_body(&err.detail));
                }
                IssuanceFailureReason::Malformed => {
                    body.error = Some("Invalid response format".to_string());
                    body.response = Some(upstream_body(&err.detail));
                }
                IssuanceFailureReason::Configuration => {
                    body.error = Some(err.detail.clone());
                }
            },
            other => body.error = Some(other.to_string()),
        }

        body
    }
}

/// Upstream bodies are echoed as JSON when they parse, otherwise as a string.
fn upstream_body(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}
