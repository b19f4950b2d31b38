//! Local audio handling on the client side of a session.
//!
//! - [`AudioTurnBuffer`] collects captured fragments between turn boundaries
//! - [`wav`] reads capture input from and writes playback output to WAV files

mod buffer;
pub mod wav;

pub use buffer::{AudioBufferError, AudioPayload, AudioTurnBuffer};
pub use wav::{AudioFileError, PcmWavWriter, read_pcm16_fragments};
