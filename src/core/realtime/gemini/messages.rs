//! Gemini Live WebSocket message types.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - `setup` - Once per session, first frame after connect
//! - `realtimeInput.activityStart` - User turn begins
//! - `realtimeInput.audio` - PCM payload for the turn
//! - `realtimeInput.activityEnd` - User turn ends
//!
//! Server messages (received from server):
//! - `setupComplete` - Setup accepted
//! - `serverContent` - Model turn parts, transcriptions, turn/generation flags
//! - `usageMetadata` - Token accounting
//! - `goAway` - Server is about to close the connection
//!
//! Every inbound field is optional; unknown fields are ignored. A field with
//! an unexpected shape reads as absent without discarding the rest of the frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::config::{INPUT_MIME_TYPE, LiveSessionConfig};
use crate::core::realtime::base::UsageMetadata;

// =============================================================================
// Client Messages
// =============================================================================

/// Frame sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupConfig),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn activity_start() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput::ActivityStart {})
    }

    pub fn audio(data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput::Audio(Blob {
            data,
            mime_type: INPUT_MIME_TYPE.to_string(),
        }))
    }

    pub fn activity_end() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput::ActivityEnd {})
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(RealtimeInput::ActivityStart {}) => "activityStart",
            ClientMessage::RealtimeInput(RealtimeInput::Audio(_)) => "audio",
            ClientMessage::RealtimeInput(RealtimeInput::ActivityEnd {}) => "activityEnd",
        }
    }
}

/// Realtime input payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RealtimeInput {
    ActivityStart {},
    Audio(Blob),
    ActivityEnd {},
}

/// Base64 media payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

/// Body of the `setup` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub realtime_input_config: RealtimeInputConfig,
    pub output_audio_transcription: AudioTranscriptionConfig,
    pub input_audio_transcription: AudioTranscriptionConfig,
}

impl SetupConfig {
    /// Audio responses, client-side turn framing, transcripts in both directions.
    pub fn from_config(config: &LiveSessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                    language_code: config.language_code.clone(),
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection { disabled: true },
            },
            output_audio_transcription: AudioTranscriptionConfig {},
            input_audio_transcription: AudioTranscriptionConfig {},
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
}

/// Presence enables transcription; serialized as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioTranscriptionConfig {}

// =============================================================================
// Server Messages
// =============================================================================

/// Frame received from the service. Several sections may be present at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    #[serde(deserialize_with = "lenient")]
    pub server_content: Option<ServerContent>,
    #[serde(deserialize_with = "lenient")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(deserialize_with = "lenient")]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Parse a text or binary frame body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    #[serde(deserialize_with = "lenient")]
    pub turn_complete: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub generation_complete: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub interrupted: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub model_turn: Option<ModelTurn>,
    #[serde(deserialize_with = "lenient")]
    pub input_transcription: Option<Transcription>,
    #[serde(deserialize_with = "lenient")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    #[serde(deserialize_with = "lenient_list")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(deserialize_with = "lenient")]
    pub text: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub thought: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    #[serde(deserialize_with = "lenient")]
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    #[serde(deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    /// Protobuf duration string, e.g. `"10s"`
    #[serde(deserialize_with = "lenient")]
    pub time_left: Option<String>,
}

/// Read a field, treating a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Read a list, keeping the elements that parse.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
