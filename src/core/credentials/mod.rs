//! Short-lived credential management.
//!
//! The browser-facing half of the system must never hold the long-lived API
//! key. Instead a credential with a short lifetime and a small use budget is
//! minted per session:
//!
//! - [`HttpTokenIssuer`] calls the upstream `auth_tokens` endpoint with the API key
//! - [`GatewayTokenIssuer`] asks a running gateway (`POST /auth/token`) instead
//! - [`CredentialCache`] sits in front of either and decides reuse vs refresh
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gemini_live_gateway::core::credentials::{
//!     CredentialCache, HttpTokenIssuer, TokenRequest, DEFAULT_ISSUER_URL, DEFAULT_ISSUANCE_TIMEOUT,
//! };
//!
//! let issuer = HttpTokenIssuer::new(DEFAULT_ISSUER_URL, api_key, DEFAULT_ISSUANCE_TIMEOUT)?;
//! let cache = Arc::new(CredentialCache::new(Arc::new(issuer), TokenRequest::default()));
//! let credential = cache.get(!cache.is_valid()).await?;
//! ```

mod cache;
mod credential;
mod issuer;
mod relay;

pub use cache::CredentialCache;
pub use credential::{
    Clock, Credential, DEFAULT_SAFETY_MARGIN, IssuanceError, IssuanceFailureReason, ManualClock,
    SystemClock, TokenRequest, format_timestamp,
};
pub use issuer::{
    DEFAULT_ISSUANCE_TIMEOUT, DEFAULT_ISSUER_URL, HttpTokenIssuer, TokenIssuer, TokenPayload,
};
pub use relay::{GatewayTokenIssuer, TokenResponse};
