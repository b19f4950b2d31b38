//! Realtime audio sessions.
//!
//! # Architecture
//!
//! - [`SessionState`] is the explicit lifecycle, advanced only through
//!   [`SessionState::transition`]
//! - [`LiveSession`] owns the socket, the turn buffer and the collaborator callbacks
//! - [`EventRouter`] turns inbound frames into transcript and playback effects
//!
//! # Example
//!
//! ```rust,ignore
//! use gemini_live_gateway::core::realtime::{LiveSession, LiveSessionConfig, Transcript};
//!
//! let session = LiveSession::new(LiveSessionConfig::default(), credentials);
//! session.open().await?;
//! session.append_audio(fragment);
//! session.send_turn().await?;
//! session.close().await?;
//! ```

mod base;
pub mod gemini;

pub use base::{
    AudioOutputCallback, RealtimeAudioData, RealtimeError, RealtimeErrorCallback, RealtimeResult,
    SessionEvent, SessionState, Transcript, TranscriptCallback, TranscriptEvent, TranscriptRole,
    TurnOutcome, UsageCallback, UsageMetadata,
};
pub use gemini::{EventRouter, LiveSession, LiveSessionConfig};
