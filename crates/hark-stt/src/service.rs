//! The transport seam between the bridge and a recognizer implementation.
//!
//! A [`SpeechService`] opens [`RemoteStream`]s. The handle is channel-backed
//! so the session never touches the socket directly; the I/O task behind the
//! channels is free to be a real WebSocket ([`crate::ws::WsSpeechService`])
//! or a scripted fake in tests.

use async_trait::async_trait;
use hark_core::{AudioChunk, TranscriptSegment};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthToken;
use crate::config::RecognizerConfig;
use crate::error::SttError;

/// Capacity of the session→service audio channel. Bounds memory when the
/// socket write side stalls; a full channel shows up as send backpressure.
pub const INPUT_BUFFER: usize = 32;

/// Capacity of the service→session event channel.
pub const EVENT_BUFFER: usize = 64;

/// What the session feeds into a stream's write side.
#[derive(Debug, Clone)]
pub enum StreamInput {
    /// One framed batch of audio.
    Audio(AudioChunk),
    /// End of speech; flush results and end the stream.
    Finalize,
}

/// What a stream's read side yields back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Revisable hypothesis.
    Partial {
        /// Text recognized so far.
        text: String,
        /// Audio time covered, ms from stream start.
        end_ms: u64,
    },
    /// Settled hypothesis; will not be revised.
    Final(TranscriptSegment),
    /// Advisory notice that the service will close the stream soon.
    Closing {
        /// Service-side reason.
        reason: String,
    },
    /// End of results; the stream is spent.
    End,
    /// The stream failed.
    Failed(SttError),
}

/// Handle to one open recognition stream.
///
/// Dropping the handle cancels the I/O task behind it; a stream is never
/// left running without an owner.
#[derive(Debug)]
pub struct RemoteStream {
    input: mpsc::Sender<StreamInput>,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    opened_at: Instant,
}

impl RemoteStream {
    /// Assemble a stream handle from its channel halves.
    ///
    /// `cancel` must stop the I/O task when triggered.
    #[must_use]
    pub fn from_parts(
        input: mpsc::Sender<StreamInput>,
        events: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            input,
            events,
            cancel,
            opened_at: Instant::now(),
        }
    }

    /// Queue one chunk for the service.
    ///
    /// Waits for channel capacity; callers that cannot tolerate an unbounded
    /// wait wrap this in a timeout and treat expiry as a transport failure.
    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<(), SttError> {
        self.input
            .send(StreamInput::Audio(chunk))
            .await
            .map_err(|_| SttError::StreamClosed)
    }

    /// Signal end of speech.
    pub async fn finalize(&self) -> Result<(), SttError> {
        self.input
            .send(StreamInput::Finalize)
            .await
            .map_err(|_| SttError::StreamClosed)
    }

    /// Next event from the service. `None` once the I/O task is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Wall-clock age of this stream, for session-duration budgeting.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Stop the I/O task without waiting for it.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens recognition streams.
///
/// One call per utterance plus one per hot swap. Implementations present
/// `token` to the service and fail with a terminal error when it is refused.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Open a stream and wait until the service acknowledges `config`.
    async fn open(
        &self,
        config: &RecognizerConfig,
        token: &AuthToken,
    ) -> Result<RemoteStream, SttError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
