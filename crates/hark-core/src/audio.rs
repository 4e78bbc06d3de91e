//! Audio format math and the chunk unit of transfer.
//!
//! Ingress hands the bridge raw PCM bytes; everything downstream (replay
//! windows, duplicate suppression, stream accounting) works in audio time.
//! The conversions here are integer math over cumulative byte counts, so the
//! derived timeline never drifts no matter how audio is chunked.

use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sample rate most recognizer models are trained on.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Encodings accepted on ingress.
///
/// Both are fixed-rate PCM codings, which keeps byte-to-duration math exact.
/// Compressed codings would break replay accounting and are rejected at
/// config validation instead of silently mis-timed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit little-endian linear PCM.
    #[default]
    Linear16,
    /// 8-bit mu-law PCM.
    Mulaw,
}

impl AudioEncoding {
    /// Encoding name the speech service expects in its config message.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Linear16 => "LINEAR16",
            Self::Mulaw => "MULAW",
        }
    }

    /// Bytes per sample per channel.
    #[must_use]
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            Self::Linear16 => 2,
            Self::Mulaw => 1,
        }
    }
}

/// Invalid negotiated audio parameters.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AudioFormatError {
    /// Sample rate outside the range the recognizer accepts.
    #[error("unsupported sample rate {0} Hz (accepted: 8000-48000)")]
    UnsupportedRate(u32),
    /// Channel count outside mono/stereo.
    #[error("unsupported channel count {0} (accepted: 1-2)")]
    UnsupportedChannels(u16),
}

/// Negotiated audio parameters for one utterance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Sample encoding.
    #[serde(default)]
    pub encoding: AudioEncoding,
    /// Channel count.
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            encoding: AudioEncoding::Linear16,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// Construct a format from explicit parameters.
    #[must_use]
    pub fn new(sample_rate: u32, encoding: AudioEncoding, channels: u16) -> Self {
        Self {
            sample_rate,
            encoding,
            channels,
        }
    }

    /// Check the parameters against what the recognizer accepts.
    pub fn validate(&self) -> Result<(), AudioFormatError> {
        if !(8_000..=48_000).contains(&self.sample_rate) {
            return Err(AudioFormatError::UnsupportedRate(self.sample_rate));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(AudioFormatError::UnsupportedChannels(self.channels));
        }
        Ok(())
    }

    /// Raw byte rate of this format.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate)
            * u64::from(self.encoding.bytes_per_sample())
            * u64::from(self.channels)
    }

    /// Audio time in milliseconds covered by `bytes` of this format.
    ///
    /// Callers pass cumulative byte counts, not per-chunk lengths, so
    /// repeated flooring cannot accumulate drift across a session.
    #[must_use]
    pub fn ms_for_bytes(&self, bytes: u64) -> u64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        bytes.saturating_mul(1000) / bps
    }
}

/// One framed batch of audio on its way to the recognizer.
///
/// Produced by ingress, consumed exactly once by the active stream's write
/// path; the replay buffer keeps a clone of the trailing unfinalized window.
/// `start_ms`/`end_ms` are audio time within the utterance, derived from
/// cumulative byte counts by the connection handler.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// Sequence number within the utterance, starting at 0.
    pub seq: u64,
    /// Raw audio bytes.
    pub payload: Bytes,
    /// Audio time at which this chunk begins.
    pub start_ms: u64,
    /// Audio time at which this chunk ends.
    pub end_ms: u64,
    /// Wall-clock arrival instant, for ingress latency logging.
    pub received_at: Instant,
}

impl AudioChunk {
    /// Create a chunk, stamping the arrival instant.
    #[must_use]
    pub fn new(seq: u64, payload: Bytes, start_ms: u64, end_ms: u64) -> Self {
        Self {
            seq,
            payload,
            start_ms,
            end_ms,
            received_at: Instant::now(),
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Audio time covered by this chunk.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
