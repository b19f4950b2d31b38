//! Gemini Live API module.
//!
//! Realtime audio conversations over the `BidiGenerateContentConstrained`
//! WebSocket endpoint, authenticated with an ephemeral credential.
//!
//! # Features
//!
//! - Client-side turn framing (automatic activity detection disabled)
//! - Input and output transcription streams
//! - Native audio responses with a prebuilt voice
//!
//! # Audio Format
//!
//! Input is PCM 16-bit signed little-endian at 16kHz, output the same at 24kHz.

mod client;
mod config;
mod messages;
mod router;

pub use client::LiveSession;
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
    GEMINI_LIVE_URL, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, LiveSessionConfig, OUTPUT_SAMPLE_RATE,
};
pub use messages::{
    Blob, ClientMessage, GoAway, InlineData, ModelTurn, Part, RealtimeInput, ServerContent,
    ServerMessage, SetupConfig, Transcription,
};
pub use router::{EventRouter, SessionCallbacks, spawn_playback_task};
