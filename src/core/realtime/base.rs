//! Base types for realtime audio sessions.
//!
//! Defines the session state machine, the error type, and the shapes handed to
//! the playback and transcript collaborators.
//!
//! # State machine
//!
//! ```text
//! Idle --Open--> Connecting --Connected--> AwaitingSetupAck --SetupAcknowledged--> Active
//!                    |                                                                |
//!                    +--IssuanceFailed--> Idle         any state --Close--> Closed <--+
//! ```
//!
//! `Closed` is terminal. All transitions go through [`SessionState::transition`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::audio::AudioBufferError;
use crate::core::credentials::IssuanceError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// No credential could be obtained before connecting
    #[error("Credential issuance failed: {0}")]
    Issuance(#[from] IssuanceError),

    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A turn was sent outside the `Active` state
    #[error("Session is not active (state: {state})")]
    NotActive { state: SessionState },

    /// The state machine rejected an event
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition {
        from: SessionState,
        event: SessionEvent,
    },

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Captured audio could not be combined into a payload
    #[error("Audio buffer error: {0}")]
    AudioBuffer(#[from] AudioBufferError),

    /// The connection closed while an operation was in flight
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Obtaining a credential and opening the socket
    Connecting,
    /// Socket open, setup frame being sent
    AwaitingSetupAck,
    /// Turns may be sent
    Active,
    /// Terminal
    Closed,
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Open,
    IssuanceFailed,
    Connected,
    SetupAcknowledged,
    Close,
}

impl SessionState {
    /// Apply `event` and return the next state, or reject it.
    pub fn transition(self, event: SessionEvent) -> RealtimeResult<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Idle, E::Open) => Ok(S::Connecting),
            (S::Connecting, E::IssuanceFailed) => Ok(S::Idle),
            (S::Connecting, E::Connected) => Ok(S::AwaitingSetupAck),
            (S::AwaitingSetupAck, E::SetupAcknowledged) => Ok(S::Active),
            (_, E::Close) => Ok(S::Closed),
            (from, event) => Err(RealtimeError::InvalidTransition { from, event }),
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::AwaitingSetupAck => write!(f, "AwaitingSetupAck"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Open => write!(f, "open"),
            SessionEvent::IssuanceFailed => write!(f, "issuance-failed"),
            SessionEvent::Connected => write!(f, "connected"),
            SessionEvent::SetupAcknowledged => write!(f, "setup-acknowledged"),
            SessionEvent::Close => write!(f, "close"),
        }
    }
}

// =============================================================================
// Collaborator Types
// =============================================================================

/// Which side of the conversation a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// Speech captured locally
    User,
    /// Speech produced by the remote model
    Model,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Model => write!(f, "model"),
        }
    }
}

/// Instruction for the transcript collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Append text to the current paragraph of `role`
    Append { role: TranscriptRole, text: String },
    /// Close the current paragraph of `role`
    NewParagraph { role: TranscriptRole },
}

/// Decoded audio chunk for the playback collaborator.
#[derive(Debug, Clone)]
pub struct RealtimeAudioData {
    /// Raw PCM bytes (16-bit signed, little-endian, mono)
    pub data: Bytes,
    /// MIME type as reported by the provider
    pub mime_type: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

/// Result of a `send_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Start, audio and end frames were queued in that order
    Sent { fragments: usize, bytes: usize },
    /// The buffer was empty; no frame was sent
    NothingToSend,
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for transcript events.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for audio output events.
pub type AudioOutputCallback =
    Arc<dyn Fn(RealtimeAudioData) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for error events.
pub type RealtimeErrorCallback =
    Arc<dyn Fn(RealtimeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for usage metadata.
pub type UsageCallback =
    Arc<dyn Fn(UsageMetadata) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Transcript Accumulator
// =============================================================================

/// Paragraph lists for both sides of a conversation, fed by [`TranscriptEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    user: Vec<String>,
    model: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &TranscriptEvent) {
        match event {
            TranscriptEvent::Append { role, text } => {
                let paragraphs = self.side_mut(*role);
                match paragraphs.last_mut() {
                    Some(current) => current.push_str(text),
                    None => paragraphs.push(text.clone()),
                }
            }
            TranscriptEvent::NewParagraph { role } => {
                let paragraphs = self.side_mut(*role);
                if paragraphs.last().is_some_and(|p| !p.is_empty()) {
                    paragraphs.push(String::new());
                }
            }
        }
    }

    /// Non-empty paragraphs of `role`, oldest first.
    pub fn paragraphs(&self, role: TranscriptRole) -> Vec<&str> {
        self.side(role)
            .iter()
            .filter(|p| !p.is_empty())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs(TranscriptRole::User).is_empty()
            && self.paragraphs(TranscriptRole::Model).is_empty()
    }

    fn side(&self, role: TranscriptRole) -> &Vec<String> {
        match role {
            TranscriptRole::User => &self.user,
            TranscriptRole::Model => &self.model,
        }
    }

    fn side_mut(&mut self, role: TranscriptRole) -> &mut Vec<String> {
        match role {
            TranscriptRole::User => &mut self.user,
            TranscriptRole::Model => &mut self.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = SessionState::Idle
            .transition(SessionEvent::Open)
            .and_then(|s| s.transition(SessionEvent::Connected))
            .and_then(|s| s.transition(SessionEvent::SetupAcknowledged))
            .unwrap();
        assert_eq!(state, SessionState::Active);
        assert_eq!(
            state.transition(SessionEvent::Close).unwrap(),
            SessionState::Closed
        );
    }

    #[test]
    fn test_any_state_can_close() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::AwaitingSetupAck,
            SessionState::Active,
            SessionState::Closed,
        ] {
            assert_eq!(
                state.transition(SessionEvent::Close).unwrap(),
                SessionState::Closed
            );
        }
    }

    #[test]
    fn test_issuance_failure_returns_to_idle() {
        let state = SessionState::Connecting
            .transition(SessionEvent::IssuanceFailed)
            .unwrap();
        assert_eq!(state, SessionState::Idle);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let err = SessionState::Idle
            .transition(SessionEvent::SetupAcknowledged)
            .unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::InvalidTransition {
                from: SessionState::Idle,
                event: SessionEvent::SetupAcknowledged
            }
        ));

        assert!(SessionState::Closed.transition(SessionEvent::Open).is_err());
        assert!(SessionState::Active.transition(SessionEvent::Open).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::NotActive {
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "Session is not active (state: Idle)");

        let err = RealtimeError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_transcript_role_display() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(TranscriptRole::Model.to_string(), "model");
    }

    #[test]
    fn test_transcript_paragraphs() {
        let mut transcript = Transcript::new();
        assert!(transcript.is_empty());

        transcript.apply(&TranscriptEvent::Append {
            role: TranscriptRole::Model,
            text: "Hello".to_string(),
        });
        transcript.apply(&TranscriptEvent::Append {
            role: TranscriptRole::Model,
            text: " there".to_string(),
        });
        transcript.apply(&TranscriptEvent::NewParagraph {
            role: TranscriptRole::Model,
        });
        // A second boundary does not open an empty paragraph
        transcript.apply(&TranscriptEvent::NewParagraph {
            role: TranscriptRole::Model,
        });
        transcript.apply(&TranscriptEvent::Append {
            role: TranscriptRole::Model,
            text: "Bye".to_string(),
        });

        assert_eq!(
            transcript.paragraphs(TranscriptRole::Model),
            vec!["Hello there", "Bye"]
        );
        assert!(transcript.paragraphs(TranscriptRole::User).is_empty());
    }

    #[test]
    fn test_usage_metadata_deserialize() {
        let usage: UsageMetadata = serde_json::from_str(
            r#"{"promptTokenCount":12,"responseTokenCount":30,"totalTokenCount":42,"promptTokensDetails":[]}"#,
        )
        .unwrap();
        assert_eq!(usage.prompt_token_count, Some(12));
        assert_eq!(usage.total_token_count, Some(42));
        assert_eq!(usage.thoughts_token_count, None);
    }
}
