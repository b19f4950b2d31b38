//! Gemini Live session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// Constrained endpoint that accepts ephemeral credentials via `access_token`.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

/// Native-audio model used when none is configured.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used when none is configured.
pub const DEFAULT_VOICE: &str = "Fenrir";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant. Ask questions and be engaging. Keep responses concise.";

/// Capture side: 16-bit PCM, mono, 16kHz.
pub const INPUT_SAMPLE_RATE: u32 = 16000;
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Playback side: 16-bit PCM, mono, 24kHz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one [`LiveSession`](super::LiveSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSessionConfig {
    /// WebSocket endpoint without the credential query parameter
    pub ws_url: String,
    pub model: String,
    pub voice: String,
    /// BCP-47 code, e.g. `en-IN`. Left to the service when unset.
    pub language_code: Option<String>,
    pub system_instruction: String,
    /// Bounds the socket handshake and the optional setup wait
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Hold `open()` until the service sends `setupComplete`
    pub await_setup_complete: bool,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            ws_url: GEMINI_LIVE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            language_code: None,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            await_setup_complete: false,
        }
    }
}

impl LiveSessionConfig {
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if self.voice.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "voice must not be empty".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(RealtimeError::InvalidConfiguration(
                "connect timeout must be positive".to_string(),
            ));
        }
        self.parse_ws_url().map(|_| ())
    }

    /// Endpoint with the credential attached as `access_token`.
    pub fn build_ws_url(&self, token: &str) -> RealtimeResult<Url> {
        let mut url = self.parse_ws_url()?;
        url.query_pairs_mut().append_pair("access_token", token);
        Ok(url)
    }

    fn parse_ws_url(&self) -> RealtimeResult<Url> {
        let url = Url::parse(&self.ws_url).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("invalid ws_url '{}': {e}", self.ws_url))
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(RealtimeError::InvalidConfiguration(format!(
                "ws_url must use ws or wss, got '{other}'"
            ))),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
