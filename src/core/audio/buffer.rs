//! Turn-scoped buffer for captured audio fragments.
//!
//! Fragments arrive as base64-encoded PCM frames from the capture side and
//! are held until the turn boundary. On release they are decoded,
//! concatenated as bytes and re-encoded once, so one utterance leaves as a
//! single payload without padding artifacts in the middle.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::prelude::*;
use thiserror::Error;

/// Capture devices do not always zero the trailing bits of the last symbol,
/// so fragments are decoded leniently.
const FRAGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioBufferError {
    /// A fragment was not valid base64. The buffer is cleared regardless.
    #[error("fragment {index} is not valid base64: {reason}")]
    InvalidFragment { index: usize, reason: String },
}

/// One released turn, ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    /// Base64 of the concatenated PCM bytes
    pub data: String,
    /// Number of fragments that went into the payload
    pub fragments: usize,
    /// Decoded size in bytes
    pub byte_len: usize,
}

/// Ordered fragments collected since the last release.
#[derive(Debug, Default)]
pub struct AudioTurnBuffer {
    fragments: Vec<String>,
}

impl AudioTurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fragment in capture order.
    pub fn append(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
        tracing::trace!("Buffered audio fragment (total: {})", self.fragments.len());
    }

    /// Drain the buffer into one payload.
    ///
    /// Returns `Ok(None)` when nothing was captured. The buffer is empty when
    /// this returns, whatever the outcome.
    pub fn release(&mut self) -> Result<Option<AudioPayload>, AudioBufferError> {
        if self.fragments.is_empty() {
            return Ok(None);
        }

        let fragments = std::mem::take(&mut self.fragments);
        let mut combined = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            FRAGMENT_ENGINE
                .decode_vec(fragment.as_bytes(), &mut combined)
                .map_err(|e| AudioBufferError::InvalidFragment {
                    index,
                    reason: e.to_string(),
                })?;
        }

        Ok(Some(AudioPayload {
            data: BASE64_STANDARD.encode(&combined),
            fragments: fragments.len(),
            byte_len: combined.len(),
        }))
    }

    /// Discard everything without producing a payload.
    pub fn clear(&mut self) {
        if !self.fragments.is_empty() {
            tracing::debug!("Cleared {} buffered audio fragments", self.fragments.len());
        }
        self.fragments.clear();
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
