//! Endpoint URL validation
//!
//! Upstream endpoints receive either the long-lived API key (the credential
//! issuer) or a bearer credential in the query string (the live socket), so
//! both must be reached over TLS. Plain `http`/`ws` is only accepted when
//! insecure endpoints are explicitly allowed for local development and tests.

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be {expected}, got: {actual}")]
    SecureSchemeRequired {
        expected: &'static str,
        actual: String,
    },

    #[error("URL scheme '{0}' is not supported for this endpoint")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Transport an endpoint is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Http,
    WebSocket,
}

impl EndpointKind {
    fn schemes(self) -> (&'static str, &'static str) {
        match self {
            EndpointKind::Http => ("https", "http"),
            EndpointKind::WebSocket => ("wss", "ws"),
        }
    }
}

/// Validates an upstream endpoint URL
///
/// 1. URL must be valid and parseable
/// 2. Scheme must match the endpoint kind, and be the TLS variant unless
///    `allow_insecure` is set
/// 3. URL must have a hostname
///
/// # Example
/// ```rust,ignore
/// use gemini_live_gateway::utils::url_validation::{validate_endpoint_url, EndpointKind};
///
/// assert!(validate_endpoint_url("https://example.com/token", EndpointKind::Http, false).is_ok());
/// assert!(validate_endpoint_url("http://localhost:3001", EndpointKind::Http, false).is_err());
/// assert!(validate_endpoint_url("ws://127.0.0.1:9000", EndpointKind::WebSocket, true).is_ok());
/// ```
pub fn validate_endpoint_url(
    url: &str,
    kind: EndpointKind,
    allow_insecure: bool,
) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    let (secure, insecure) = kind.schemes();

    let scheme = parsed.scheme();
    if scheme == insecure {
        if !allow_insecure {
            return Err(UrlValidationError::SecureSchemeRequired {
                expected: secure,
                actual: scheme.to_string(),
            });
        }
        warn!(url = %redact_query(&parsed), "Using insecure endpoint");
    } else if scheme != secure {
        return Err(UrlValidationError::UnsupportedScheme(scheme.to_string()));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(parsed)
}

/// Render a URL without its query string, for logs.
pub fn redact_query(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
