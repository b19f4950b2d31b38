//! Configuration module for the gateway
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use gemini_live_gateway::config::GatewayConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = GatewayConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = GatewayConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::credentials::{DEFAULT_ISSUER_URL, TokenRequest};
use crate::core::realtime::LiveSessionConfig;
use crate::utils::url_validation::{EndpointKind, validate_endpoint_url};

/// Gateway configuration
///
/// Covers the token relay server and the live session client:
/// - Server settings (host, port)
/// - Upstream API key and issuer endpoint
/// - Credential lifetime, use budget and reuse margin
/// - Live session defaults (endpoint, model, voice, instruction)
/// - Security settings (CORS, insecure endpoints)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// Long-lived Gemini API key; never leaves the server
    pub api_key: Option<String>,

    // Credential issuance
    pub issuer_url: String,
    /// Relay endpoint (`POST /auth/token`) used by clients without the API key
    pub gateway_url: Option<String>,
    pub token_expire_minutes: u32,
    pub token_new_session_minutes: u32,
    /// 0 = unlimited
    pub token_uses: u32,
    pub token_timeout_seconds: u64,
    pub token_safety_margin_seconds: u64,

    // Live session defaults
    pub live: LiveSessionConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Accept http/ws endpoints (local development and tests only)
    pub allow_insecure_endpoints: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            api_key: None,
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            gateway_url: None,
            token_expire_minutes: 5,
            token_new_session_minutes: 1,
            token_uses: 1,
            token_timeout_seconds: 30,
            token_safety_margin_seconds: 30,
            live: LiveSessionConfig::default(),
            cors_allowed_origins: Some("*".to_string()),
            allow_insecure_endpoints: false,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for GatewayConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables (with defaults)
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values (loaded in main.rs at startup)
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::env_base()?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    fn env_base() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();
        let live_defaults = LiveSessionConfig::default();

        Ok(Self {
            host: env_string("HOST").unwrap_or_else(|| defaults.host.clone()),
            port: env_parse("PORT", defaults.port)?,
            api_key: env_string("GEMINI_API_KEY"),
            issuer_url: env_string("TOKEN_ISSUER_URL")
                .unwrap_or_else(|| defaults.issuer_url.clone()),
            gateway_url: env_string("TOKEN_GATEWAY_URL"),
            token_expire_minutes: env_parse("TOKEN_EXPIRE_MINUTES", defaults.token_expire_minutes)?,
            token_new_session_minutes: env_parse(
                "TOKEN_NEW_SESSION_MINUTES",
                defaults.token_new_session_minutes,
            )?,
            token_uses: env_parse("TOKEN_USES", defaults.token_uses)?,
            token_timeout_seconds: env_parse(
                "TOKEN_TIMEOUT_SECONDS",
                defaults.token_timeout_seconds,
            )?,
            token_safety_margin_seconds: env_parse(
                "TOKEN_SAFETY_MARGIN_SECONDS",
                defaults.token_safety_margin_seconds,
            )?,
            live: LiveSessionConfig {
                ws_url: env_string("LIVE_WS_URL").unwrap_or(live_defaults.ws_url),
                model: env_string("LIVE_MODEL").unwrap_or(live_defaults.model),
                voice: env_string("LIVE_VOICE").unwrap_or(live_defaults.voice),
                language_code: env_string("LIVE_LANGUAGE_CODE"),
                system_instruction: env_string("LIVE_SYSTEM_INSTRUCTION")
                    .unwrap_or(live_defaults.system_instruction),
                connect_timeout: Duration::from_secs(env_parse(
                    "LIVE_CONNECT_TIMEOUT_SECONDS",
                    live_defaults.connect_timeout.as_secs(),
                )?),
                await_setup_complete: env_bool(
                    "LIVE_AWAIT_SETUP_COMPLETE",
                    live_defaults.await_setup_complete,
                )?,
            },
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS")
                .or_else(|| defaults.cors_allowed_origins.clone()),
            allow_insecure_endpoints: env_bool(
                "ALLOW_INSECURE_ENDPOINTS",
                defaults.allow_insecure_endpoints,
            )?,
        })
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
        }

        if let Some(gemini) = yaml.gemini
            && let Some(key) = gemini.api_key
        {
            self.api_key = Some(key);
        }

        if let Some(token) = yaml.token {
            if let Some(url) = token.issuer_url {
                self.issuer_url = url;
            }
            if token.gateway_url.is_some() {
                self.gateway_url = token.gateway_url;
            }
            if let Some(v) = token.expire_minutes {
                self.token_expire_minutes = v;
            }
            if let Some(v) = token.new_session_minutes {
                self.token_new_session_minutes = v;
            }
            if let Some(v) = token.uses {
                self.token_uses = v;
            }
            if let Some(v) = token.timeout_seconds {
                self.token_timeout_seconds = v;
            }
            if let Some(v) = token.safety_margin_seconds {
                self.token_safety_margin_seconds = v;
            }
        }

        if let Some(live) = yaml.live {
            if let Some(url) = live.ws_url {
                self.live.ws_url = url;
            }
            if let Some(model) = live.model {
                self.live.model = model;
            }
            if let Some(voice) = live.voice {
                self.live.voice = voice;
            }
            if live.language_code.is_some() {
                self.live.language_code = live.language_code;
            }
            if let Some(instruction) = live.system_instruction {
                self.live.system_instruction = instruction;
            }
            if let Some(secs) = live.connect_timeout_seconds {
                self.live.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(wait) = live.await_setup_complete {
                self.live.await_setup_complete = wait;
            }
        }

        if let Some(security) = yaml.security {
            if security.cors_allowed_origins.is_some() {
                self.cors_allowed_origins = security.cors_allowed_origins;
            }
            if let Some(allow) = security.allow_insecure_endpoints {
                self.allow_insecure_endpoints = allow;
            }
        }
    }

    /// Check cross-field constraints and endpoint URLs.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let lifetime_secs = u64::from(self.token_expire_minutes) * 60;
        if self.token_expire_minutes == 0 {
            return Err("TOKEN_EXPIRE_MINUTES must be greater than 0".into());
        }
        if self.token_new_session_minutes >= self.token_expire_minutes {
            return Err(format!(
                "TOKEN_NEW_SESSION_MINUTES ({}) must be shorter than TOKEN_EXPIRE_MINUTES ({})",
                self.token_new_session_minutes, self.token_expire_minutes
            )
            .into());
        }
        if self.token_safety_margin_seconds >= lifetime_secs {
            return Err(format!(
                "TOKEN_SAFETY_MARGIN_SECONDS ({}) must be shorter than the token lifetime ({}s)",
                self.token_safety_margin_seconds, lifetime_secs
            )
            .into());
        }
        if self.token_timeout_seconds == 0 {
            return Err("TOKEN_TIMEOUT_SECONDS must be greater than 0".into());
        }

        let insecure = self.allow_insecure_endpoints;
        validate_endpoint_url(&self.issuer_url, EndpointKind::Http, insecure)
            .map_err(|e| format!("Invalid TOKEN_ISSUER_URL: {e}"))?;
        if let Some(ref url) = self.gateway_url {
            validate_endpoint_url(url, EndpointKind::Http, insecure)
                .map_err(|e| format!("Invalid TOKEN_GATEWAY_URL: {e}"))?;
        }
        validate_endpoint_url(&self.live.ws_url, EndpointKind::WebSocket, insecure)
            .map_err(|e| format!("Invalid LIVE_WS_URL: {e}"))?;
        self.live
            .validate()
            .map_err(|e| format!("Invalid live session settings: {e}"))?;

        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lifetime, grace window and use budget for each issued credential.
    pub fn token_request(&self) -> TokenRequest {
        TokenRequest::from_minutes(
            self.token_expire_minutes,
            self.token_new_session_minutes,
            self.token_uses,
        )
    }

    pub fn issuance_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_seconds)
    }

    pub fn safety_margin(&self) -> time::Duration {
        time::Duration::seconds(self.token_safety_margin_seconds as i64)
    }

    /// The API key, or an error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str, String> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "GEMINI_API_KEY is not configured".to_string())
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid value for {name} ('{raw}'): {e}").into()),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, Box<dyn std::error::Error>> {
    match env_string(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(format!("Invalid boolean for {name}: '{raw}'").into()),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "GEMINI_API_KEY",
        "TOKEN_ISSUER_URL",
        "TOKEN_GATEWAY_URL",
        "TOKEN_EXPIRE_MINUTES",
        "TOKEN_NEW_SESSION_MINUTES",
        "TOKEN_USES",
        "TOKEN_TIMEOUT_SECONDS",
        "TOKEN_SAFETY_MARGIN_SECONDS",
        "LIVE_WS_URL",
        "LIVE_MODEL",
        "LIVE_VOICE",
        "LIVE_LANGUAGE_CODE",
        "LIVE_SYSTEM_INSTRUCTION",
        "LIVE_CONNECT_TIMEOUT_SECONDS",
        "LIVE_AWAIT_SETUP_COMPLETE",
        "CORS_ALLOWED_ORIGINS",
        "ALLOW_INSECURE_ENDPOINTS",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for name in ENV_VARS {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert_eq!(config.api_key, None);
        assert_eq!(config.issuer_url, DEFAULT_ISSUER_URL);
        assert_eq!(config.token_expire_minutes, 5);
        assert_eq!(config.token_new_session_minutes, 1);
        assert_eq!(config.token_uses, 1);
        assert_eq!(config.live.voice, "Fenrir");
        assert!(!config.live.await_setup_complete);
        assert_eq!(config.cors_allowed_origins.as_deref(), Some("*"));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "8080");
            env::set_var("GEMINI_API_KEY", "env-key");
            env::set_var("TOKEN_EXPIRE_MINUTES", "10");
            env::set_var("TOKEN_USES", "0");
            env::set_var("LIVE_VOICE", "Puck");
            env::set_var("LIVE_AWAIT_SETUP_COMPLETE", "true");
            env::set_var("LIVE_CONNECT_TIMEOUT_SECONDS", "4");
        }

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.require_api_key().unwrap(), "env-key");
        assert_eq!(config.token_expire_minutes, 10);
        assert_eq!(config.token_uses, 0);
        assert_eq!(config.live.voice, "Puck");
        assert!(config.live.await_setup_complete);
        assert_eq!(config.live.connect_timeout, Duration::from_secs(4));

        let request = config.token_request();
        assert_eq!(request.lifetime, time::Duration::minutes(10));
        assert_eq!(request.uses, 0);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let err = GatewayConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid value for PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_margin_must_be_shorter_than_lifetime() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TOKEN_EXPIRE_MINUTES", "2");
            env::set_var("TOKEN_SAFETY_MARGIN_SECONDS", "120");
        }

        let err = GatewayConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TOKEN_SAFETY_MARGIN_SECONDS"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_insecure_endpoints_rejected_by_default() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TOKEN_ISSUER_URL", "http://localhost:9000/auth_tokens");
        }
        assert!(GatewayConfig::from_env().is_err());

        unsafe {
            env::set_var("ALLOW_INSECURE_ENDPOINTS", "true");
        }
        assert!(GatewayConfig::from_env().is_ok());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

gemini:
  api_key: "yaml-key"

token:
  uses: 3

live:
  language_code: "en-IN"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "10.0.0.1");
            env::set_var("GEMINI_API_KEY", "env-key");
            env::set_var("LIVE_VOICE", "Kore");
        }

        let config = GatewayConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_uses, 3);
        assert_eq!(config.live.language_code.as_deref(), Some("en-IN"));
        // ENV value kept where YAML is silent
        assert_eq!(config.live.voice, "Kore");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = GatewayConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }
}
