//! The utterance session: one spoken utterance from start to settled end.
//!
//! A session owns exactly one logical recognition stream and drives it over
//! as many physical streams as the utterance needs. It multiplexes three
//! concerns in a single task: audio arriving from the client, results coming
//! back from the recognizer, and the deadlines that force a hot swap or end
//! a drain. The client-facing contract is strict: results arrive in order,
//! no finalized audio is ever re-reported, and end of utterance is announced
//! exactly once.

use std::time::Duration;

use hark_core::{AudioChunk, UtteranceId};
use hark_stt::{RecognizerConfig, RemoteStream, SttError, StreamEvent};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::continuity::ContinuityManager;
use crate::emitter::{ResultEmitter, UtteranceEvent};
use crate::metrics::{
    AUDIO_FORWARDED_MS_TOTAL, RESULTS_TOTAL, UTTERANCE_DURATION_SECONDS, UTTERANCES_TOTAL,
};
use crate::replay::{DEFAULT_REPLAY_WINDOW_MS, ReplayBuffer};

/// Default time allowed for the recognizer to flush results after stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a single audio write may block before the stream is
/// declared stalled.
pub const DEFAULT_WRITE_STALL: Duration = Duration::from_secs(5);

/// Audio fed into a session by the ingress side.
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// One chunk of utterance audio.
    Chunk(AudioChunk),
    /// End of speech; the session drains and finishes.
    Stop,
}

/// Lifecycle states of an utterance session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No utterance in progress.
    Idle,
    /// Opening the initial stream.
    Negotiating,
    /// Audio flowing, results coming back.
    Streaming,
    /// Stop received; waiting for the recognizer to flush.
    Draining,
    /// Ended with a terminal error.
    Failed,
    /// Ended normally or by cancellation.
    Closed,
}

impl SessionState {
    /// Lower-case label for logs and wire payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Tunable timeouts and windows for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// How long to wait for results after the client stops speaking.
    pub drain_timeout: Duration,
    /// How long one audio write may block before forcing a swap.
    pub write_stall: Duration,
    /// How much trailing unfinalized audio to keep for replay.
    pub replay_window_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            write_stall: DEFAULT_WRITE_STALL,
            replay_window_ms: DEFAULT_REPLAY_WINDOW_MS,
        }
    }
}

/// How a finished session ended, with summary figures for the caller.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    /// Terminal state: `Failed` or `Closed`.
    pub state: SessionState,
    /// Finalized segments delivered.
    pub segments: usize,
    /// Hot swaps performed.
    pub swaps: u32,
    /// Audio milliseconds accepted from the client.
    pub audio_ms: u64,
    /// Joined text of the finalized segments.
    pub transcript: String,
}

/// One utterance, driven to completion by [`UtteranceSession::run`].
pub struct UtteranceSession {
    id: UtteranceId,
    config: RecognizerConfig,
    continuity: ContinuityManager,
    limits: SessionLimits,
    cancel: CancellationToken,
}

/// Why the stream loop stopped.
enum LoopEnd {
    /// Drain complete (or timed out); announce end of utterance.
    Finish,
    /// Cancelled, or the caller went away. Ends silently.
    Cancelled,
    /// Terminal error; announce it.
    Failed(SttError),
}

impl UtteranceSession {
    /// Session for one utterance with default limits and a fresh cancel
    /// token.
    #[must_use]
    pub fn new(id: UtteranceId, config: RecognizerConfig, continuity: ContinuityManager) -> Self {
        Self {
            id,
            config,
            continuity,
            limits: SessionLimits::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the session limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Use an externally owned cancel token (the registry's, typically).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// This session's utterance ID.
    #[must_use]
    pub fn id(&self) -> &UtteranceId {
        &self.id
    }

    /// Token that stops this session when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the utterance to completion.
    ///
    /// Consumes audio from `audio`, delivers [`UtteranceEvent`]s to
    /// `egress`, and returns once the utterance is finished, failed, or
    /// cancelled. Dropping the egress receiver cancels the session.
    pub async fn run(
        self,
        mut audio: mpsc::Receiver<AudioInput>,
        egress: mpsc::Sender<UtteranceEvent>,
    ) -> SessionOutcome {
        let started = Instant::now();
        let mut emitter = ResultEmitter::new();
        let mut replay = ReplayBuffer::new(self.limits.replay_window_ms);
        let mut swaps: u32 = 0;

        debug!(utterance = %self.id, state = SessionState::Negotiating.as_str(), "opening initial stream");
        let end = match self.continuity.open_initial(&self.config, &self.cancel).await {
            Ok(stream) => {
                self.stream_loop(stream, &mut audio, &egress, &mut emitter, &mut replay, &mut swaps)
                    .await
            }
            Err(err) => LoopEnd::Failed(err),
        };

        self.conclude(end, &egress, &mut emitter, &replay, swaps, started)
            .await
    }

    /// The streaming/draining phases: one `select!` over audio in, events
    /// out, and the two deadlines.
    async fn stream_loop(
        &self,
        mut stream: RemoteStream,
        audio: &mut mpsc::Receiver<AudioInput>,
        egress: &mpsc::Sender<UtteranceEvent>,
        emitter: &mut ResultEmitter,
        replay: &mut ReplayBuffer,
        swaps: &mut u32,
    ) -> LoopEnd {
        let mut state = SessionState::Streaming;
        let mut swap_at = self.continuity.swap_deadline(&stream);
        let mut drain_by = far_future();
        info!(utterance = %self.id, state = state.as_str(), "utterance streaming");

        loop {
            // A swap cannot run inside a select arm while the other arms
            // still borrow the dying stream, so arms only pick the trigger
            // and the swap happens after the select resolves.
            let mut swap_trigger: Option<&'static str> = None;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(utterance = %self.id, "session cancelled");
                    return LoopEnd::Cancelled;
                }

                () = tokio::time::sleep_until(swap_at), if state == SessionState::Streaming => {
                    debug!(utterance = %self.id, age_ms = u64::try_from(stream.elapsed().as_millis()).unwrap_or(u64::MAX), "stream cap approaching");
                    swap_trigger = Some("cap");
                }

                () = tokio::time::sleep_until(drain_by), if state == SessionState::Draining => {
                    warn!(utterance = %self.id, "drain timed out; finishing with what we have");
                    return LoopEnd::Finish;
                }

                event = stream.next_event() => match event {
                    Some(StreamEvent::Partial { text, end_ms }) => {
                        counter!(RESULTS_TOTAL, "kind" => "partial").increment(1);
                        if let Some(event) = emitter.on_partial(text, end_ms) {
                            if egress.send(event).await.is_err() {
                                return LoopEnd::Cancelled;
                            }
                        }
                    }
                    Some(StreamEvent::Final(segment)) => {
                        counter!(RESULTS_TOTAL, "kind" => "final").increment(1);
                        if let Some(event) = emitter.on_final(segment) {
                            replay.mark_finalized(emitter.finalized_through_ms());
                            if egress.send(event).await.is_err() {
                                return LoopEnd::Cancelled;
                            }
                        }
                    }
                    Some(StreamEvent::Closing { reason }) => {
                        // Advisory only. The swap happens when the stream
                        // actually ends or hits the cap margin.
                        info!(utterance = %self.id, reason, "service announced close");
                    }
                    Some(StreamEvent::End) => {
                        if state == SessionState::Draining {
                            return LoopEnd::Finish;
                        }
                        warn!(utterance = %self.id, "service ended the stream early");
                        swap_trigger = Some("service_end");
                    }
                    Some(StreamEvent::Failed(err)) => {
                        if state == SessionState::Draining {
                            warn!(utterance = %self.id, error = %err, "stream failed during drain; finishing with what we have");
                            return LoopEnd::Finish;
                        }
                        if !err.is_transient() {
                            return LoopEnd::Failed(err);
                        }
                        warn!(utterance = %self.id, error = %err, "stream failed; swapping");
                        swap_trigger = Some("transport");
                    }
                    None => {
                        if state == SessionState::Draining {
                            warn!(utterance = %self.id, "stream vanished during drain; finishing with what we have");
                            return LoopEnd::Finish;
                        }
                        warn!(utterance = %self.id, "stream vanished; swapping");
                        swap_trigger = Some("transport");
                    }
                },

                input = audio.recv(), if state == SessionState::Streaming => match input {
                    Some(AudioInput::Chunk(chunk)) => {
                        counter!(AUDIO_FORWARDED_MS_TOTAL).increment(chunk.duration_ms());
                        replay.push(&chunk);
                        match tokio::time::timeout(self.limits.write_stall, stream.send_audio(chunk)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                warn!(utterance = %self.id, error = %err, "audio write failed; swapping");
                                swap_trigger = Some("transport");
                            }
                            Err(_) => {
                                warn!(utterance = %self.id, stall_ms = u64::try_from(self.limits.write_stall.as_millis()).unwrap_or(u64::MAX), "audio write stalled; swapping");
                                swap_trigger = Some("transport");
                            }
                        }
                    }
                    Some(AudioInput::Stop) => {
                        state = SessionState::Draining;
                        drain_by = Instant::now() + self.limits.drain_timeout;
                        info!(utterance = %self.id, state = state.as_str(), audio_ms = replay.latest_end_ms(), "stop received; draining");
                        if let Err(err) = stream.finalize().await {
                            // The read side will surface the loss next.
                            debug!(utterance = %self.id, error = %err, "finalize did not reach the stream");
                        }
                    }
                    None => {
                        info!(utterance = %self.id, "audio source went away");
                        return LoopEnd::Cancelled;
                    }
                },
            }

            if let Some(trigger) = swap_trigger {
                match self
                    .continuity
                    .swap(&self.config, replay, trigger, &self.cancel)
                    .await
                {
                    Ok(swap) => {
                        emitter.set_stream_offset(swap.replay_start_ms);
                        stream = swap.stream;
                        swap_at = self.continuity.swap_deadline(&stream);
                        *swaps += 1;
                    }
                    Err(err) => return LoopEnd::Failed(err),
                }
            }
        }
    }

    async fn conclude(
        &self,
        end: LoopEnd,
        egress: &mpsc::Sender<UtteranceEvent>,
        emitter: &mut ResultEmitter,
        replay: &ReplayBuffer,
        swaps: u32,
        started: Instant,
    ) -> SessionOutcome {
        let state = match end {
            LoopEnd::Finish => {
                if let Some(event) = emitter.finish() {
                    // The receiver may already be gone; the utterance still
                    // counts as complete.
                    let _ = egress.send(event).await;
                }
                counter!(UTTERANCES_TOTAL, "outcome" => "completed").increment(1);
                SessionState::Closed
            }
            LoopEnd::Cancelled => {
                counter!(UTTERANCES_TOTAL, "outcome" => "cancelled").increment(1);
                SessionState::Closed
            }
            LoopEnd::Failed(err) => {
                error!(utterance = %self.id, error = %err, kind = err.kind().as_str(), "utterance failed");
                let _ = egress
                    .send(UtteranceEvent::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    })
                    .await;
                counter!(UTTERANCES_TOTAL, "outcome" => "failed").increment(1);
                SessionState::Failed
            }
        };

        histogram!(UTTERANCE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        let outcome = SessionOutcome {
            state,
            segments: emitter.segments().len(),
            swaps,
            audio_ms: replay.latest_end_ms(),
            transcript: emitter.transcript(),
        };
        info!(
            utterance = %self.id,
            state = outcome.state.as_str(),
            segments = outcome.segments,
            swaps = outcome.swaps,
            audio_ms = outcome.audio_ms,
            "utterance finished"
        );
        outcome
    }
}

/// A deadline that never fires on its own. Keeps disabled `select!` timer
/// arms valid without an `Option` dance.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
