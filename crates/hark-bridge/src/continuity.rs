//! Stream lifetime management: opens, bounded reconnects, and hot swaps.
//!
//! The remote service caps how long one physical stream may live. The
//! continuity manager tracks that budget, opens successor streams a safety
//! margin before expiry (or immediately on a transient failure), fetches a
//! fresh credential for every open, and replays the unfinalized audio
//! window into the successor so the seam is inaudible to the client.

use std::sync::Arc;
use std::time::Duration;

use hark_core::ReconnectPolicy;
use hark_stt::{CredentialProvider, RecognizerConfig, RemoteStream, SpeechService, SttError};
use metrics::counter;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{REPLAYED_MS_TOTAL, STREAM_OPENS_TOTAL, SWAP_FAILURES_TOTAL, SWAPS_TOTAL};
use crate::replay::ReplayBuffer;

/// Default per-stream duration cap enforced by the remote service.
pub const DEFAULT_MAX_STREAM: Duration = Duration::from_secs(240);

/// Default safety margin: swap this long before the cap.
pub const DEFAULT_SWAP_MARGIN: Duration = Duration::from_secs(10);

/// Opens and replaces recognition streams on behalf of a session.
#[derive(Clone)]
pub struct ContinuityManager {
    service: Arc<dyn SpeechService>,
    credentials: Arc<dyn CredentialProvider>,
    policy: ReconnectPolicy,
    max_stream: Duration,
    swap_margin: Duration,
}

/// A successor stream, ready to take over from a dying one.
pub struct Swap {
    /// The freshly opened stream, replay already written.
    pub stream: RemoteStream,
    /// Utterance audio time at which this stream's audio begins.
    pub replay_start_ms: u64,
    /// Chunks replayed into the stream before handoff.
    pub replayed_chunks: usize,
}

impl ContinuityManager {
    /// Manager with default cap, margin, and reconnect policy.
    #[must_use]
    pub fn new(service: Arc<dyn SpeechService>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            service,
            credentials,
            policy: ReconnectPolicy::default(),
            max_stream: DEFAULT_MAX_STREAM,
            swap_margin: DEFAULT_SWAP_MARGIN,
        }
    }

    /// Override the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the service's stream cap and the swap margin.
    #[must_use]
    pub fn with_stream_budget(mut self, max_stream: Duration, swap_margin: Duration) -> Self {
        self.max_stream = max_stream;
        self.swap_margin = swap_margin;
        self
    }

    /// Instant by which the stream must be handed over to a successor.
    #[must_use]
    pub fn swap_deadline(&self, stream: &RemoteStream) -> Instant {
        // Floor of one second so a misconfigured margin cannot produce a
        // tight swap loop.
        let budget = self
            .max_stream
            .saturating_sub(self.swap_margin)
            .max(Duration::from_secs(1));
        Instant::now() + budget.saturating_sub(stream.elapsed())
    }

    /// Open the first stream of an utterance.
    ///
    /// Transient failures retry under the reconnect policy; auth, quota,
    /// and config failures return immediately.
    pub async fn open_initial(
        &self,
        config: &RecognizerConfig,
        cancel: &CancellationToken,
    ) -> Result<RemoteStream, SttError> {
        self.open_with_retry(config, cancel).await
    }

    /// Open a successor stream and replay the unfinalized window into it.
    ///
    /// `trigger` labels the swap metric: the cap margin, a transport
    /// failure, or the service ending the stream early.
    pub async fn swap(
        &self,
        config: &RecognizerConfig,
        replay: &ReplayBuffer,
        trigger: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Swap, SttError> {
        let replay_start_ms = replay.replay_start_ms();
        let stream = match self.open_with_retry(config, cancel).await {
            Ok(stream) => stream,
            Err(err) => {
                counter!(SWAP_FAILURES_TOTAL).increment(1);
                return Err(err);
            }
        };

        let chunks = replay.snapshot();
        let replayed_chunks = chunks.len();
        let mut replayed_ms = 0u64;
        for chunk in chunks {
            replayed_ms += chunk.duration_ms();
            if let Err(err) = stream.send_audio(chunk).await {
                counter!(SWAP_FAILURES_TOTAL).increment(1);
                return Err(err);
            }
        }

        counter!(SWAPS_TOTAL, "trigger" => trigger).increment(1);
        counter!(REPLAYED_MS_TOTAL).increment(replayed_ms);
        info!(trigger, replayed_chunks, replayed_ms, replay_start_ms, "stream swapped");

        Ok(Swap {
            stream,
            replay_start_ms,
            replayed_chunks,
        })
    }

    async fn open_with_retry(
        &self,
        config: &RecognizerConfig,
        cancel: &CancellationToken,
    ) -> Result<RemoteStream, SttError> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_open(config).await {
                Ok(stream) => {
                    counter!(STREAM_OPENS_TOTAL, "result" => "ok").increment(1);
                    return Ok(stream);
                }
                Err(err) => {
                    counter!(STREAM_OPENS_TOTAL, "result" => "error").increment(1);
                    attempt += 1;
                    if !err.is_transient() || attempt >= self.policy.max_attempts {
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(attempt - 1, rand::random());
                    warn!(error = %err, attempt, ?delay, "stream open failed; retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(err),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_open(&self, config: &RecognizerConfig) -> Result<RemoteStream, SttError> {
        // One credential fetch per open, so rotation is picked up at swaps.
        let token = self.credentials.token().await?;
        self.service.open(config, &token).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use hark_core::{AudioChunk, AudioEncoding, AudioFormat};
    use hark_stt::{AuthError, AuthToken, StaticCredentials, StreamInput};
    use tokio::sync::{Mutex, mpsc};

    fn config() -> RecognizerConfig {
        RecognizerConfig::new(AudioFormat::new(16_000, AudioEncoding::Linear16, 1))
    }

    fn instant_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
            jitter_factor: 0.0,
        }
    }

    /// Service that fails the first `failures` opens with a transient
    /// error, then hands out streams whose inputs are captured.
    struct FlakyService {
        failures: u32,
        opens: AtomicU32,
        received: Arc<Mutex<Vec<StreamInput>>>,
    }

    impl FlakyService {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                opens: AtomicU32::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl SpeechService for FlakyService {
        async fn open(
            &self,
            _config: &RecognizerConfig,
            _token: &AuthToken,
        ) -> Result<RemoteStream, SttError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(SttError::Transport("connection reset".into()));
            }
            let (input_tx, mut input_rx) = mpsc::channel(64);
            let (_event_tx, event_rx) = mpsc::channel(8);
            let received = Arc::clone(&self.received);
            let _pump = tokio::spawn(async move {
                while let Some(item) = input_rx.recv().await {
                    received.lock().await.push(item);
                }
            });
            Ok(RemoteStream::from_parts(
                input_tx,
                event_rx,
                CancellationToken::new(),
            ))
        }
    }

    /// Service that always fails with a terminal error.
    struct RejectingService;

    #[async_trait]
    impl SpeechService for RejectingService {
        async fn open(
            &self,
            _config: &RecognizerConfig,
            _token: &AuthToken,
        ) -> Result<RemoteStream, SttError> {
            Err(SttError::Auth(AuthError::Rejected("bad token".into())))
        }
    }

    fn manager(service: Arc<dyn SpeechService>, attempts: u32) -> ContinuityManager {
        ContinuityManager::new(
            service,
            Arc::new(StaticCredentials::new(AuthToken::new("t"))),
        )
        .with_policy(instant_policy(attempts))
    }

    #[tokio::test]
    async fn transient_open_failures_retry_until_success() {
        let service = Arc::new(FlakyService::new(2));
        let mgr = manager(service.clone(), 3);

        let stream = mgr
            .open_initial(&config(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(service.opens.load(Ordering::SeqCst), 3);
        drop(stream);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let service = Arc::new(FlakyService::new(10));
        let mgr = manager(service.clone(), 3);

        let err = mgr
            .open_initial(&config(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(service.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_never_retry() {
        let service = Arc::new(RejectingService);
        let mgr = manager(service, 3);

        let err = mgr
            .open_initial(&config(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::Auth(_)));
    }

    /// Provider whose token has already expired.
    #[derive(Debug)]
    struct ExpiredCredentials;

    #[async_trait]
    impl CredentialProvider for ExpiredCredentials {
        async fn token(&self) -> Result<AuthToken, AuthError> {
            Err(AuthError::TokenExpired("2026-01-01T00:00:00Z".into()))
        }
    }

    #[tokio::test]
    async fn credential_failures_fail_before_any_open() {
        let service = Arc::new(FlakyService::new(0));
        let mgr = ContinuityManager::new(service.clone(), Arc::new(ExpiredCredentials))
            .with_policy(instant_policy(3));

        let err = mgr
            .open_initial(&config(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::Auth(AuthError::TokenExpired(_))));
        assert_eq!(service.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn swap_replays_the_buffered_window() {
        let service = Arc::new(FlakyService::new(0));
        let mgr = manager(service.clone(), 3);

        let mut replay = ReplayBuffer::new(2_000);
        for i in 0..4u64 {
            replay.push(&AudioChunk::new(
                i,
                bytes::Bytes::from(vec![0u8; 320]),
                i * 100,
                (i + 1) * 100,
            ));
        }
        replay.mark_finalized(200);

        let swap = mgr
            .swap(&config(), &replay, "transport", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(swap.replay_start_ms, 200);
        assert_eq!(swap.replayed_chunks, 2);

        // The successor received exactly the unfinalized chunks, in order.
        tokio::task::yield_now().await;
        let received = service.received.lock().await;
        let seqs: Vec<u64> = received
            .iter()
            .map(|i| match i {
                StreamInput::Audio(c) => c.seq,
                StreamInput::Finalize => panic!("unexpected finalize"),
            })
            .collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn swap_with_empty_buffer_rebases_to_write_position() {
        let service = Arc::new(FlakyService::new(0));
        let mgr = manager(service, 3);

        let mut replay = ReplayBuffer::new(2_000);
        replay.push(&AudioChunk::new(
            0,
            bytes::Bytes::from(vec![0u8; 320]),
            0,
            100,
        ));
        replay.mark_finalized(100);

        let swap = mgr
            .swap(&config(), &replay, "cap", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(swap.replay_start_ms, 100);
        assert_eq!(swap.replayed_chunks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_deadline_accounts_for_stream_age() {
        let service = Arc::new(FlakyService::new(0));
        let mgr = manager(service, 3).with_stream_budget(
            Duration::from_secs(240),
            Duration::from_secs(10),
        );

        let stream = mgr
            .open_initial(&config(), &CancellationToken::new())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let deadline = mgr.swap_deadline(&stream);
        // 240 - 10 - 30 = 200s from now.
        assert_eq!(deadline - Instant::now(), Duration::from_secs(200));
    }
}
