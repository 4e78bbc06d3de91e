//! Trailing audio window for hot-swap replay.
//!
//! The buffer keeps clones of recently forwarded chunks so a successor
//! stream can re-hear what the dying stream never finalized. Two bounds
//! prune it: audio wholly covered by an emitted final is dropped the moment
//! the final lands (finalized audio is never replayed), and retention never
//! exceeds the configured trailing window even when nothing finalizes.

use std::collections::VecDeque;

use hark_core::AudioChunk;

/// Default trailing window retained for replay.
pub const DEFAULT_REPLAY_WINDOW_MS: u64 = 2_000;

/// Bounded buffer of the most recent unfinalized audio.
#[derive(Debug)]
pub struct ReplayBuffer {
    window_ms: u64,
    chunks: VecDeque<AudioChunk>,
    finalized_through_ms: u64,
    latest_end_ms: u64,
    buffered_bytes: usize,
}

impl ReplayBuffer {
    /// Buffer retaining at most `window_ms` of trailing audio.
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            chunks: VecDeque::new(),
            finalized_through_ms: 0,
            latest_end_ms: 0,
            buffered_bytes: 0,
        }
    }

    /// Record a chunk that was just forwarded to the active stream.
    pub fn push(&mut self, chunk: &AudioChunk) {
        self.latest_end_ms = self.latest_end_ms.max(chunk.end_ms);
        self.buffered_bytes += chunk.len();
        self.chunks.push_back(chunk.clone());
        self.prune();
    }

    /// Advance the finalized watermark. Audio at or before it will never be
    /// replayed. The watermark only moves forward.
    pub fn mark_finalized(&mut self, through_ms: u64) {
        if through_ms > self.finalized_through_ms {
            self.finalized_through_ms = through_ms;
            self.prune();
        }
    }

    fn prune(&mut self) {
        let window_floor = self.latest_end_ms.saturating_sub(self.window_ms);
        let keep_after = self.finalized_through_ms.max(window_floor);
        while let Some(front) = self.chunks.front() {
            if front.end_ms > keep_after {
                break;
            }
            self.buffered_bytes -= front.len();
            let _ = self.chunks.pop_front();
        }
    }

    /// Audio time at which a replay into a successor stream would begin.
    ///
    /// With nothing retained this is the current write position, so the
    /// successor's results rebase correctly even with an empty replay.
    #[must_use]
    pub fn replay_start_ms(&self) -> u64 {
        self.chunks.front().map_or(self.latest_end_ms, |c| c.start_ms)
    }

    /// Clones of the retained chunks, oldest first.
    ///
    /// The chunks stay buffered; they are still unfinalized and a second
    /// swap may need them again.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AudioChunk> {
        self.chunks.iter().cloned().collect()
    }

    /// Highest audio time seen so far.
    #[must_use]
    pub fn latest_end_ms(&self) -> u64 {
        self.latest_end_ms
    }

    /// Current finalized watermark.
    #[must_use]
    pub fn finalized_through_ms(&self) -> u64 {
        self.finalized_through_ms
    }

    /// Retained audio duration.
    #[must_use]
    pub fn buffered_ms(&self) -> u64 {
        self.chunks
            .front()
            .map_or(0, |front| self.latest_end_ms.saturating_sub(front.start_ms))
    }

    /// Retained payload bytes.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Number of retained chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
