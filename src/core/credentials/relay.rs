//! Issuer that goes through the gateway's own `/auth/token` endpoint.
//!
//! This is the path a client without the API key takes: it asks the gateway
//! for a credential and never sees the long-lived secret.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::credential::{Clock, Credential, IssuanceError, SystemClock, TokenRequest};
use super::issuer::TokenIssuer;

/// Body returned by `POST /auth/token`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Requested lifetime in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u32>,
    /// Absolute expiry (RFC 3339, UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// [`TokenIssuer`] that asks a gateway instead of the upstream API.
pub struct GatewayTokenIssuer {
    client: Client,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl GatewayTokenIssuer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, IssuanceError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            IssuanceError::configuration(format!("Failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn credential_from(
        &self,
        body: TokenResponse,
        request: &TokenRequest,
        now: OffsetDateTime,
    ) -> Result<Credential, IssuanceError> {
        if !body.success {
            let mut detail = body.error.unwrap_or_else(|| "Unknown error".to_string());
            if let Some(response) = body.response {
                detail.push_str(&format!(" ({response})"));
            }
            return match body.http_code {
                Some(code) => Err(IssuanceError::status(code, detail)),
                None => Err(IssuanceError::malformed(detail)),
            };
        }

        let token = body
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| IssuanceError::malformed("gateway response has no token"))?;

        let expires_at = match (body.expire_time.as_deref(), body.expiry) {
            (Some(ts), _) => OffsetDateTime::parse(ts, &Rfc3339)
                .map_err(|e| IssuanceError::malformed(format!("bad expireTime {ts:?}: {e}")))?,
            (None, Some(minutes)) => now + time::Duration::minutes(i64::from(minutes)),
            (None, None) => now + request.lifetime,
        };

        Ok(Credential {
            token,
            expires_at,
            new_session_expires_at: None,
            uses: request.uses,
        })
    }
}

#[async_trait]
impl TokenIssuer for GatewayTokenIssuer {
    async fn issue(&self, request: &TokenRequest) -> Result<Credential, IssuanceError> {
        let now = self.clock.now();

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Requested-With", "XMLHttpRequest")
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| IssuanceError::transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| IssuanceError::transport(format!("Failed to read response: {e}")))?;

        if status != StatusCode::OK {
            return Err(IssuanceError::status(status.as_u16(), text));
        }

        let body: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| IssuanceError::malformed(format!("{e}: {text}")))?;

        let credential = self.credential_from(body, request, now)?;
        tracing::debug!("Gateway issued credential {}", credential.redacted());
        Ok(credential)
    }
}
