//! Per-connection lifecycle — one framed TCP client from accept through
//! disconnect.
//!
//! The handler splits the framed stream, spawns a writer task fed by a
//! bounded egress queue, and drives a read loop over ingress frames. A
//! `start`/`stop` bracket maps to one [`UtteranceSession`] running on its own
//! task; audio frames between the brackets are stamped with their utterance
//! timeline position and forwarded over a bounded channel, so a slow
//! recognizer backpressures the client through TCP rather than buffering
//! without bound.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hark_bridge::{AudioInput, UtteranceEvent, UtteranceSession};
use hark_core::{AudioChunk, AudioFormat, ConnectionId, ErrorKind, UtteranceId};
use hark_stt::RecognizerConfig;
use metrics::{counter, gauge, histogram};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::FrameCodec;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    FRAME_ERRORS_TOTAL, FRAMES_TOTAL, PROTOCOL_ERRORS_TOTAL,
};
use crate::protocol::{EgressFrame, IngressFrame, UtteranceConfig};
use crate::server::ServerState;
use crate::settings::Settings;

/// Capacity of the egress write queue.
const EGRESS_BUFFER: usize = 64;

/// Capacity of the connection→session audio channel.
const AUDIO_BUFFER: usize = 32;

/// How long disconnect waits for the writer to flush queued frames.
const WRITER_FLUSH: Duration = Duration::from_secs(1);

/// Stamps raw payloads with their position on the utterance timeline.
///
/// Times derive from the cumulative byte count, not per-chunk lengths, so
/// flooring never accumulates drift across a session.
struct AudioTimeline {
    format: AudioFormat,
    bytes: u64,
    seq: u64,
}

impl AudioTimeline {
    fn new(format: AudioFormat) -> Self {
        Self {
            format,
            bytes: 0,
            seq: 0,
        }
    }

    fn stamp(&mut self, payload: Bytes) -> AudioChunk {
        let start_ms = self.format.ms_for_bytes(self.bytes);
        self.bytes += payload.len() as u64;
        let end_ms = self.format.ms_for_bytes(self.bytes);
        let chunk = AudioChunk::new(self.seq, payload, start_ms, end_ms);
        self.seq += 1;
        chunk
    }
}

/// The open `start`/`stop` bracket on a connection.
///
/// Holding this is what makes audio frames legal. The session behind
/// `audio_tx` may finish early on a terminal error; audio sent after that is
/// dropped here, and `stop` still closes the bracket silently.
struct ActiveUtterance {
    id: UtteranceId,
    audio_tx: mpsc::Sender<AudioInput>,
    timeline: AudioTimeline,
}

/// Run one client connection to completion.
#[instrument(skip_all, fields(connection = %conn))]
pub async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnectionId,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    let codec = FrameCodec::new(state.settings().server.max_payload_bytes);
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    let (writer_tx, mut writer_rx) = mpsc::channel::<EgressFrame>(EGRESS_BUFFER);
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let started = Instant::now();
    info!(%peer, "client connected");
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let mut language_override: Option<String> = None;
    let mut active: Option<ActiveUtterance> = None;

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break "shutdown",
            next = frames.next() => match next {
                None => break "client closed",
                Some(Ok(frame)) => {
                    counter!(FRAMES_TOTAL, "kind" => frame_kind(&frame)).increment(1);
                    match frame {
                        IngressFrame::Describe => {
                            send_frame(&writer_tx, EgressFrame::Info(state.info().clone())).await;
                        }
                        IngressFrame::Transcribe { language } => {
                            debug!(language = ?language, "language override for next utterance");
                            language_override = language;
                        }
                        IngressFrame::Start(config) => {
                            if active.is_some() {
                                reject(&writer_tx, "utterance already active on this connection")
                                    .await;
                            } else {
                                let format = config.format;
                                let recognizer = recognizer_config(
                                    state.settings(),
                                    &config,
                                    language_override.take(),
                                );
                                match begin_utterance(&state, &conn, recognizer, format, &writer_tx)
                                    .await
                                {
                                    Ok(utterance) => {
                                        info!(utterance = %utterance.id, "utterance started");
                                        active = Some(utterance);
                                    }
                                    Err(frame) => {
                                        if matches!(
                                            frame,
                                            EgressFrame::Error { kind: ErrorKind::Protocol, .. }
                                        ) {
                                            counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
                                        }
                                        send_frame(&writer_tx, frame).await;
                                    }
                                }
                            }
                        }
                        IngressFrame::AudioChunk(payload) => match active.as_mut() {
                            Some(utterance) => {
                                let chunk = utterance.timeline.stamp(payload);
                                if utterance.audio_tx.send(AudioInput::Chunk(chunk)).await.is_err()
                                {
                                    // Session ended on its own; the client has
                                    // already been sent its terminal error.
                                    debug!(utterance = %utterance.id, "dropping audio for finished utterance");
                                }
                            }
                            None => reject(&writer_tx, "audio outside an utterance").await,
                        },
                        IngressFrame::Stop => match active.take() {
                            Some(utterance) => {
                                debug!(utterance = %utterance.id, "stop received");
                                if utterance.audio_tx.send(AudioInput::Stop).await.is_err() {
                                    debug!(utterance = %utterance.id, "utterance already finished at stop");
                                }
                            }
                            None => reject(&writer_tx, "stop without an active utterance").await,
                        },
                    }
                }
                Some(Err(err)) => {
                    let fatal = err.is_fatal();
                    counter!(FRAME_ERRORS_TOTAL, "fatal" => if fatal { "true" } else { "false" })
                        .increment(1);
                    warn!(error = %err, fatal, "bad ingress frame");
                    send_frame(
                        &writer_tx,
                        EgressFrame::Error {
                            kind: ErrorKind::Protocol,
                            message: err.to_string(),
                        },
                    )
                    .await;
                    if fatal {
                        break "framing error";
                    }
                }
            }
        }
    };

    // Tear down: cancel any in-flight utterance, then let the writer flush
    // whatever is already queued before the socket drops.
    drop(active);
    state.registry().cancel_connection(&conn).await;
    drop(writer_tx);
    if tokio::time::timeout(WRITER_FLUSH, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(reason, "client disconnected");
    counter!(DISCONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Claim the registry, spawn the session and its egress forwarder, and hand
/// back the bracket handle. On failure the caller gets the error frame to
/// send; no session state is left behind.
async fn begin_utterance(
    state: &Arc<ServerState>,
    conn: &ConnectionId,
    config: RecognizerConfig,
    format: AudioFormat,
    writer_tx: &mpsc::Sender<EgressFrame>,
) -> Result<ActiveUtterance, EgressFrame> {
    if let Err(err) = config.validate() {
        return Err(EgressFrame::Error {
            kind: ErrorKind::Config,
            message: err.to_string(),
        });
    }

    let utterance = UtteranceId::new();
    let cancel = CancellationToken::new();
    if let Err(err) = state
        .registry()
        .claim(conn, utterance.clone(), cancel.clone())
        .await
    {
        return Err(EgressFrame::Error {
            kind: ErrorKind::Protocol,
            message: err.to_string(),
        });
    }

    let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER);
    let (event_tx, mut event_rx) = mpsc::channel::<UtteranceEvent>(EGRESS_BUFFER);

    let session = UtteranceSession::new(utterance.clone(), config, state.continuity().clone())
        .with_limits(state.limits())
        .with_cancel(cancel);

    let forward_tx = writer_tx.clone();
    drop(tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if forward_tx.send(event.into()).await.is_err() {
                break;
            }
        }
    }));

    let run_state = state.clone();
    let run_conn = conn.clone();
    let run_utterance = utterance.clone();
    drop(tokio::spawn(async move {
        // The session logs its own outcome; this task only returns the slot.
        let _ = session.run(audio_rx, event_tx).await;
        run_state.registry().release(&run_conn, &run_utterance).await;
    }));

    Ok(ActiveUtterance {
        id: utterance,
        audio_tx,
        timeline: AudioTimeline::new(format),
    })
}

/// Resolve the recognizer configuration for one utterance.
///
/// Language precedence: the `start` frame, then the connection's
/// `transcribe` override, then the configured default. Server-wide phrase
/// boosts and any sent with `start` are both applied.
fn recognizer_config(
    settings: &Settings,
    requested: &UtteranceConfig,
    override_language: Option<String>,
) -> RecognizerConfig {
    let language = requested
        .language
        .clone()
        .or(override_language)
        .unwrap_or_else(|| settings.recognizer.default_language.clone());

    RecognizerConfig::new(requested.format)
        .with_language(language)
        .with_model(settings.recognizer.model.clone())
        .with_alternative_languages(settings.recognizer.alternative_languages.clone())
        .with_phrases(settings.recognizer.phrase_boosts.clone())
        .with_phrases(requested.phrase_boosts.clone())
}

fn frame_kind(frame: &IngressFrame) -> &'static str {
    match frame {
        IngressFrame::Describe => "describe",
        IngressFrame::Transcribe { .. } => "transcribe",
        IngressFrame::Start(_) => "start",
        IngressFrame::AudioChunk(_) => "audio_chunk",
        IngressFrame::Stop => "stop",
    }
}

async fn reject(writer: &mpsc::Sender<EgressFrame>, message: impl Into<String>) {
    counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
    send_frame(
        writer,
        EgressFrame::Error {
            kind: ErrorKind::Protocol,
            message: message.into(),
        },
    )
    .await;
}

async fn send_frame(writer: &mpsc::Sender<EgressFrame>, frame: EgressFrame) {
    if writer.send(frame).await.is_err() {
        debug!("egress writer gone, dropping frame");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RecognizerSettings;

    fn format_16k() -> AudioFormat {
        // 16kHz mono linear16, 32000 bytes per second.
        AudioFormat::default()
    }

    // ── AudioTimeline ───────────────────────────────────────────────

    #[test]
    fn timeline_stamps_cumulative_offsets() {
        // 16kHz mono 16-bit: 3200 bytes = 100ms.
        let mut timeline = AudioTimeline::new(format_16k());

        let a = timeline.stamp(Bytes::from(vec![0u8; 3_200]));
        assert_eq!((a.seq, a.start_ms, a.end_ms), (0, 0, 100));

        let b = timeline.stamp(Bytes::from(vec![0u8; 3_200]));
        assert_eq!((b.seq, b.start_ms, b.end_ms), (1, 100, 200));
    }

    #[test]
    fn timeline_does_not_drift_on_odd_chunks() {
        let mut timeline = AudioTimeline::new(format_16k());

        // 999-byte chunks floor individually but the cumulative count is
        // what gets converted.
        for _ in 0..32 {
            let _ = timeline.stamp(Bytes::from(vec![0u8; 999]));
        }
        let last = timeline.stamp(Bytes::from(vec![0u8; 32]));

        // 32 * 999 + 32 = 32000 bytes = exactly 1 second.
        assert_eq!(last.end_ms, 1_000);
    }

    // ── recognizer_config ───────────────────────────────────────────

    fn base_settings() -> Settings {
        Settings {
            recognizer: RecognizerSettings {
                default_language: "en-US".to_owned(),
                alternative_languages: vec!["en-GB".to_owned()],
                phrase_boosts: vec!["hark".to_owned()],
                ..RecognizerSettings::default()
            },
            ..Settings::default()
        }
    }

    #[test]
    fn start_frame_language_wins() {
        let mut requested = UtteranceConfig::new(format_16k());
        requested.language = Some("fr-FR".to_owned());

        let config = recognizer_config(&base_settings(), &requested, Some("de-DE".to_owned()));
        assert_eq!(config.language, "fr-FR");
    }

    #[test]
    fn transcribe_override_beats_default() {
        let requested = UtteranceConfig::new(format_16k());
        let config = recognizer_config(&base_settings(), &requested, Some("de-DE".to_owned()));
        assert_eq!(config.language, "de-DE");
    }

    #[test]
    fn settings_default_language_is_fallback() {
        let requested = UtteranceConfig::new(format_16k());
        let config = recognizer_config(&base_settings(), &requested, None);
        assert_eq!(config.language, "en-US");
        assert_eq!(config.alternative_languages, vec!["en-GB".to_owned()]);
    }

    #[test]
    fn phrase_boosts_merge_from_both_sides() {
        let mut requested = UtteranceConfig::new(format_16k());
        requested.phrase_boosts = vec!["kitchen lights".to_owned()];

        let config = recognizer_config(&base_settings(), &requested, None);
        assert_eq!(config.contexts.len(), 2);
        assert_eq!(config.contexts[0].phrases, vec!["hark".to_owned()]);
        assert_eq!(config.contexts[1].phrases, vec!["kitchen lights".to_owned()]);
    }

    #[test]
    fn empty_phrase_lists_add_no_contexts() {
        let requested = UtteranceConfig::new(format_16k());
        let mut settings = base_settings();
        settings.recognizer.phrase_boosts.clear();

        let config = recognizer_config(&settings, &requested, None);
        assert!(config.contexts.is_empty());
    }

    // ── frame_kind ──────────────────────────────────────────────────

    #[test]
    fn frame_kinds_match_wire_names() {
        assert_eq!(frame_kind(&IngressFrame::Describe), "describe");
        assert_eq!(
            frame_kind(&IngressFrame::Transcribe { language: None }),
            "transcribe"
        );
        assert_eq!(
            frame_kind(&IngressFrame::Start(UtteranceConfig::new(format_16k()))),
            "start"
        );
        assert_eq!(
            frame_kind(&IngressFrame::AudioChunk(Bytes::from_static(b"pcm"))),
            "audio_chunk"
        );
        assert_eq!(frame_kind(&IngressFrame::Stop), "stop");
    }
}
