pub mod audio;
pub mod credentials;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{AudioBufferError, AudioPayload, AudioTurnBuffer};

pub use credentials::{
    Credential, CredentialCache, GatewayTokenIssuer, HttpTokenIssuer, IssuanceError,
    IssuanceFailureReason, TokenIssuer, TokenRequest,
};

pub use realtime::{
    LiveSession, LiveSessionConfig, RealtimeError, RealtimeResult, SessionState, Transcript,
    TranscriptEvent, TranscriptRole, TurnOutcome,
};
