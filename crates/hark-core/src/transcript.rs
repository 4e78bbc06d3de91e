//! Recognition results as they flow toward the client.

use serde::{Deserialize, Serialize};

/// One recognition result for a span of audio, in the client-facing
/// vocabulary.
///
/// Within one utterance, `Final` events cover monotonically non-decreasing
/// audio time, and a `Partial` never follows a `Final` that supersedes the
/// same span. The result emitter enforces both.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptEvent {
    /// Provisional text that later results may revise.
    Partial {
        /// Current best hypothesis.
        text: String,
    },
    /// Confirmed-stable text for a span of audio.
    Final {
        /// Finalized text.
        text: String,
        /// Recognizer confidence, 0.0 when the service omits it.
        confidence: f32,
    },
}

impl TranscriptEvent {
    /// Whether this is a `Final` event.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }

    /// The carried text, regardless of variant.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Partial { text } | Self::Final { text, .. } => text,
        }
    }
}

/// One finalized span, as accumulated on the utterance session.
///
/// Segments are append-only and ordered by `end_ms`; joining their texts
/// yields the utterance transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Finalized text.
    pub text: String,
    /// Recognizer confidence.
    pub confidence: f32,
    /// Utterance audio time this segment covers through.
    pub end_ms: u64,
}

/// Join finalized segments into the utterance transcript.
#[must_use]
pub fn join_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
