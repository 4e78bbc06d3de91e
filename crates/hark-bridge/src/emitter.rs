//! Ordering and deduplication of recognition results.
//!
//! Each physical stream reports audio time relative to its own start. The
//! emitter rebases those times by the stream's replay-start offset so
//! utterance time stays continuous across hot swaps, then enforces the
//! client-facing ordering rules: finals cover monotonically non-decreasing
//! audio time, partials never trail behind finalized audio, and end of
//! utterance is announced exactly once.

use hark_core::{ErrorKind, TranscriptEvent, TranscriptSegment, transcript::join_segments};
use tracing::debug;

/// Client-facing event produced by an utterance session.
#[derive(Clone, Debug, PartialEq)]
pub enum UtteranceEvent {
    /// A partial or final recognition result.
    Transcript(TranscriptEvent),
    /// No further results for this utterance. Carries the joined transcript
    /// of every finalized segment.
    EndOfUtterance {
        /// Full utterance text.
        transcript: String,
    },
    /// The utterance failed terminally.
    Error {
        /// Taxonomy kind for the client.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

/// Turns raw stream results into ordered utterance events.
#[derive(Debug, Default)]
pub struct ResultEmitter {
    /// Added to the active stream's audio times to get utterance time.
    stream_offset_ms: u64,
    /// Utterance audio time finalized so far.
    finalized_through_ms: u64,
    segments: Vec<TranscriptSegment>,
    finished: bool,
}

impl ResultEmitter {
    /// Emitter for a fresh utterance; the initial stream starts at offset 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebase subsequent results for a stream whose audio begins at
    /// `replay_start_ms` of utterance time. Called on every hot swap.
    pub fn set_stream_offset(&mut self, replay_start_ms: u64) {
        self.stream_offset_ms = replay_start_ms;
    }

    /// Handle a partial hypothesis. `None` when the partial only re-covers
    /// audio that already finalized (a replay echo).
    pub fn on_partial(&mut self, text: String, end_ms: u64) -> Option<UtteranceEvent> {
        let utterance_end = self.stream_offset_ms.saturating_add(end_ms);
        if utterance_end <= self.finalized_through_ms {
            debug!(utterance_end, finalized = self.finalized_through_ms, "stale partial dropped");
            return None;
        }
        Some(UtteranceEvent::Transcript(TranscriptEvent::Partial { text }))
    }

    /// Handle a final result with stream-relative timing. `None` when the
    /// final duplicates an already-finalized span.
    pub fn on_final(&mut self, mut segment: TranscriptSegment) -> Option<UtteranceEvent> {
        segment.end_ms = self.stream_offset_ms.saturating_add(segment.end_ms);
        if segment.end_ms <= self.finalized_through_ms {
            debug!(
                end_ms = segment.end_ms,
                finalized = self.finalized_through_ms,
                "duplicate final dropped"
            );
            return None;
        }
        self.finalized_through_ms = segment.end_ms;
        let event = UtteranceEvent::Transcript(TranscriptEvent::Final {
            text: segment.text.clone(),
            confidence: segment.confidence,
        });
        self.segments.push(segment);
        Some(event)
    }

    /// Announce end of utterance. Exactly one caller gets `Some`.
    pub fn finish(&mut self) -> Option<UtteranceEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(UtteranceEvent::EndOfUtterance {
            transcript: join_segments(&self.segments),
        })
    }

    /// Utterance audio time finalized so far.
    #[must_use]
    pub fn finalized_through_ms(&self) -> u64 {
        self.finalized_through_ms
    }

    /// Finalized segments accumulated so far, in order.
    #[must_use]
    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    /// Joined text of the finalized segments.
    #[must_use]
    pub fn transcript(&self) -> String {
        join_segments(&self.segments)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
