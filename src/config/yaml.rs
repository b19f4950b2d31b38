use serde::Deserialize;
use std::path::Path;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// gemini:
///   api_key: "your-gemini-api-key"
///
/// token:
///   issuer_url: "https://generativelanguage.googleapis.com/v1alpha/auth_tokens"
///   gateway_url: "http://localhost:3001/auth/token"
///   expire_minutes: 5
///   new_session_minutes: 1
///   uses: 1
///   timeout_seconds: 30
///   safety_margin_seconds: 30
///
/// live:
///   ws_url: "wss://generativelanguage.googleapis.com/ws/..."
///   model: "models/gemini-2.5-flash-native-audio-preview-09-2025"
///   voice: "Fenrir"
///   language_code: "en-IN"
///   system_instruction: "You are a helpful assistant."
///   connect_timeout_seconds: 10
///   await_setup_complete: false
///
/// security:
///   cors_allowed_origins: "https://app.example.com,https://admin.example.com"
///   allow_insecure_endpoints: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub gemini: Option<GeminiYaml>,
    pub token: Option<TokenYaml>,
    pub live: Option<LiveYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
}

/// Credential issuance settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TokenYaml {
    pub issuer_url: Option<String>,
    /// Relay endpoint used instead of the upstream issuer when set
    pub gateway_url: Option<String>,
    pub expire_minutes: Option<u32>,
    pub new_session_minutes: Option<u32>,
    pub uses: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub safety_margin_seconds: Option<u64>,
}

/// Live session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveYaml {
    pub ws_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub language_code: Option<String>,
    pub system_instruction: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
    pub await_setup_complete: Option<bool>,
}

/// Security settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub allow_insecure_endpoints: Option<bool>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
