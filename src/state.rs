use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::core::credentials::{HttpTokenIssuer, IssuanceError, TokenIssuer, TokenRequest};

/// Application state shared across handlers
pub struct AppState {
    pub config: GatewayConfig,
    /// Issues a fresh credential on every `/auth/token` call
    pub issuer: Arc<dyn TokenIssuer>,
    pub token_request: TokenRequest,
}

impl AppState {
    /// Build the state with an upstream issuer holding the configured API key.
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>, IssuanceError> {
        let api_key = config
            .require_api_key()
            .map_err(IssuanceError::configuration)?
            .to_string();
        let issuer = HttpTokenIssuer::new(
            config.issuer_url.clone(),
            api_key,
            config.issuance_timeout(),
        )?;

        Ok(Self::with_issuer(config, Arc::new(issuer)))
    }

    /// Build the state around an existing issuer.
    pub fn with_issuer(config: GatewayConfig, issuer: Arc<dyn TokenIssuer>) -> Arc<Self> {
        let token_request = config.token_request();
        Arc::new(Self {
            config,
            issuer,
            token_request,
        })
    }
}
