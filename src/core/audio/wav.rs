//! WAV file helpers standing in for a capture device and a speaker.
//!
//! Input must be 16-bit mono PCM at the session input rate; it is cut into
//! fixed-duration base64 fragments the way a capture worklet would emit them.
//! Output audio (16-bit mono PCM) is appended to a WAV file as it arrives.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use base64::prelude::*;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioFileError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),
}

/// Read a WAV file and split it into base64 fragments of `chunk_ms` each.
pub fn read_pcm16_fragments(
    path: &Path,
    expected_sample_rate: u32,
    chunk_ms: u32,
) -> Result<Vec<String>, AudioFileError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
    {
        return Err(AudioFileError::UnsupportedFormat(format!(
            "expected 16-bit mono PCM, got {} channel(s) at {} bits",
            spec.channels, spec.bits_per_sample
        )));
    }
    if spec.sample_rate != expected_sample_rate {
        return Err(AudioFileError::UnsupportedFormat(format!(
            "expected {expected_sample_rate} Hz, got {} Hz",
            spec.sample_rate
        )));
    }

    let samples_per_chunk = (expected_sample_rate as usize * chunk_ms.max(1) as usize) / 1000;
    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;

    let fragments = samples
        .chunks(samples_per_chunk.max(1))
        .map(|chunk| {
            let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            BASE64_STANDARD.encode(bytes)
        })
        .collect();

    Ok(fragments)
}

/// Incremental 16-bit mono WAV writer for received audio.
pub struct PcmWavWriter {
    writer: WavWriter<BufWriter<File>>,
    samples_written: usize,
}

impl PcmWavWriter {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, AudioFileError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: WavWriter::create(path, spec)?,
            samples_written: 0,
        })
    }

    /// Append little-endian PCM bytes. A trailing odd byte is dropped.
    pub fn write_pcm(&mut self, pcm: &[u8]) -> Result<(), AudioFileError> {
        for pair in pcm.chunks_exact(2) {
            self.writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            self.samples_written += 1;
        }
        Ok(())
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    pub fn finalize(self) -> Result<(), AudioFileError> {
        self.writer.finalize()?;
        Ok(())
    }
}
