//! Upstream credential issuer.
//!
//! Calls the `auth_tokens` endpoint of the Generative Language API with the
//! long-lived API key and turns the answer into a [`Credential`].
//!
//! # Request
//!
//! ```text
//! POST /v1alpha/auth_tokens
//! x-goog-api-key: <key>
//! {"expireTime":"2024-01-01T00:05:00Z","newSessionExpireTime":"2024-01-01T00:01:00Z","uses":1}
//! ```
//!
//! A 200 answer carries `{"name": "auth_tokens/..."}`; the name is the token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use zeroize::Zeroizing;

use super::credential::{
    Clock, Credential, IssuanceError, SystemClock, TokenRequest, format_timestamp,
};

/// Upstream ephemeral-token endpoint. Only exists on v1alpha.
pub const DEFAULT_ISSUER_URL: &str =
    "https://generativelanguage.googleapis.com/v1alpha/auth_tokens";

/// Hard upper bound on one issuance call.
pub const DEFAULT_ISSUANCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can mint a short-lived credential.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a fresh credential.
    async fn issue(&self, request: &TokenRequest) -> Result<Credential, IssuanceError>;
}

/// JSON body sent to the issuing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub expire_time: String,
    pub new_session_expire_time: String,
    pub uses: u32,
}

impl TokenPayload {
    pub fn new(request: &TokenRequest, now: OffsetDateTime) -> Result<Self, IssuanceError> {
        let format = |at| {
            format_timestamp(at).map_err(|e| {
                IssuanceError::configuration(format!("Failed to format timestamp: {e}"))
            })
        };

        Ok(Self {
            expire_time: format(now + request.lifetime)?,
            new_session_expire_time: format(now + request.new_session_grace)?,
            uses: request.uses,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthTokenResponse {
    #[serde(default)]
    name: Option<String>,
}

/// [`TokenIssuer`] backed by the upstream HTTP endpoint.
pub struct HttpTokenIssuer {
    client: Client,
    endpoint: String,
    api_key: Zeroizing<String>,
    clock: Arc<dyn Clock>,
}

impl HttpTokenIssuer {
    /// Build an issuer with its own HTTP client bounded by `timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IssuanceError> {
        let api_key = Zeroizing::new(api_key.into());
        if api_key.is_empty() {
            return Err(IssuanceError::configuration("API key is required"));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            IssuanceError::configuration(format!("Failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to compute absolute timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, request: &TokenRequest) -> Result<Credential, IssuanceError> {
        let now = self.clock.now();
        let payload = TokenPayload::new(request, now)?;

        tracing::debug!(
            "Requesting credential (expireTime={}, newSessionExpireTime={}, uses={})",
            payload.expire_time,
            payload.new_session_expire_time,
            payload.uses
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IssuanceError::transport(format!("request timed out: {e}"))
                } else {
                    IssuanceError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IssuanceError::transport(format!("Failed to read response: {e}")))?;

        if status != StatusCode::OK {
            tracing::warn!("Credential issuer returned {}: {}", status, body);
            return Err(IssuanceError::status(status.as_u16(), body));
        }

        let parsed: AuthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| IssuanceError::malformed(format!("{e}: {body}")))?;

        let token = parsed
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| IssuanceError::malformed(format!("missing `name` field: {body}")))?;

        let credential = Credential {
            token,
            expires_at: now + request.lifetime,
            new_session_expires_at: Some(now + request.new_session_grace),
            uses: request.uses,
        };
        tracing::info!("Issued credential {}", credential.redacted());
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::IssuanceFailureReason;
    use time::macros::datetime;

    #[test]
    fn test_payload_timestamps() {
        let request = TokenRequest::from_minutes(5, 1, 1);
        let payload = TokenPayload::new(&request, datetime!(2024-01-01 00:00:00 UTC)).unwrap();

        assert_eq!(payload.expire_time, "2024-01-01T00:05:00Z");
        assert_eq!(payload.new_session_expire_time, "2024-01-01T00:01:00Z");
        assert_eq!(payload.uses, 1);
    }

    #[test]
    fn test_payload_serialization() {
        let request = TokenRequest::from_minutes(10, 2, 0);
        let payload = TokenPayload::new(&request, datetime!(2024-06-30 23:55:10 UTC)).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["expireTime"], "2024-07-01T00:05:10Z");
        assert_eq!(json["newSessionExpireTime"], "2024-06-30T23:57:10Z");
        assert_eq!(json["uses"], 0);
    }

    #[test]
    fn test_api_key_required() {
        let result = HttpTokenIssuer::new(DEFAULT_ISSUER_URL, "", DEFAULT_ISSUANCE_TIMEOUT);
        match result {
            Err(err) => assert_eq!(err.reason, IssuanceFailureReason::Configuration),
            Ok(_) => panic!("Expected configuration error"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Bind then release a port so nothing is listening on it
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let issuer = HttpTokenIssuer::new(
            format!("http://127.0.0.1:{port}/v1alpha/auth_tokens"),
            "key",
            Duration::from_secs(2),
        )
        .unwrap();

        let err = issuer.issue(&TokenRequest::default()).await.unwrap_err();
        assert_eq!(err.reason, IssuanceFailureReason::Transport);
    }
}
