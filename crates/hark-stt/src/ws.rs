//! WebSocket transport for the recognizer — implements [`SpeechService`]
//! over `tokio-tungstenite`.
//!
//! `open` performs the full handshake before handing the stream out: TCP or
//! TLS connect with a bearer `Authorization` header, the `start` message,
//! and the service's `started` acknowledgement, all under one connect
//! timeout. A spawned I/O task then pumps the socket both directions until
//! end-of-results, failure, or cancellation.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hark_core::TranscriptSegment;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{AuthError, AuthToken};
use crate::config::RecognizerConfig;
use crate::error::SttError;
use crate::service::{
    EVENT_BUFFER, INPUT_BUFFER, RemoteStream, SpeechService, StreamEvent, StreamInput,
};
use crate::wire::{ClientMessage, ServerMessage, error_for_code};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default budget for connect, upgrade, `start`, and the `started` ack.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`SpeechService`] backed by a recognizer WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsSpeechService {
    endpoint: String,
    connect_timeout: Duration,
}

impl WsSpeechService {
    /// Service talking to `endpoint` (a `ws://` or `wss://` URL).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    /// Endpoint this service connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self, token: &AuthToken) -> Result<WsStream, SttError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SttError::Config(format!("bad endpoint {}: {e}", self.endpoint)))?;
        let bearer = format!("Bearer {}", token.as_str())
            .parse()
            .map_err(|_| SttError::Auth(AuthError::Rejected("token is not header-safe".into())))?;
        let _ = request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(request).await.map_err(map_connect_error)?;
        Ok(ws)
    }
}

#[async_trait]
impl SpeechService for WsSpeechService {
    async fn open(
        &self,
        config: &RecognizerConfig,
        token: &AuthToken,
    ) -> Result<RemoteStream, SttError> {
        config.validate()?;

        let handshake = async {
            let mut ws = self.connect(token).await?;
            let start = serde_json::to_string(&ClientMessage::Start {
                config: config.clone(),
            })
            .map_err(|e| SttError::Config(e.to_string()))?;
            ws.send(Message::Text(start.into()))
                .await
                .map_err(|e| SttError::Transport(format!("send start: {e}")))?;
            wait_for_ack(&mut ws).await?;
            Ok::<WsStream, SttError>(ws)
        };
        let ws = timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                SttError::Transport(format!(
                    "stream open timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;

        debug!(
            endpoint = %self.endpoint,
            language = %config.language,
            model = %config.model,
            "recognition stream open"
        );

        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let _io = tokio::spawn(run_stream_io(ws, input_rx, event_tx, cancel.clone()));

        Ok(RemoteStream::from_parts(input_tx, event_rx, cancel))
    }
}

/// Read frames until the service acknowledges the `start` config.
async fn wait_for_ack(ws: &mut WsStream) -> Result<(), SttError> {
    loop {
        let Some(msg) = ws.next().await else {
            return Err(SttError::Transport(
                "connection closed before acknowledgement".into(),
            ));
        };
        let msg = msg.map_err(|e| SttError::Transport(e.to_string()))?;
        match msg {
            Message::Text(text) => {
                return match parse_server_message(text.as_str())? {
                    ServerMessage::Started => Ok(()),
                    ServerMessage::Error { code, message } => Err(error_for_code(&code, &message)),
                    other => Err(SttError::Transport(format!(
                        "expected acknowledgement, got {other:?}"
                    ))),
                };
            }
            Message::Close(_) => {
                return Err(SttError::Transport(
                    "connection closed before acknowledgement".into(),
                ));
            }
            // Control frames may precede the ack.
            _ => {}
        }
    }
}

/// Pump one open socket: audio and `finalize` out, events in.
///
/// Exits on end-of-results, failure, cancellation, or the session dropping
/// its handle. Always attempts a close frame on the way out.
async fn run_stream_io(
    ws: WsStream,
    mut input: mpsc::Receiver<StreamInput>,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            item = input.recv() => {
                // A dropped handle means the session is done with this stream.
                let Some(item) = item else { break };
                let msg = match item {
                    StreamInput::Audio(chunk) => Message::Binary(chunk.payload),
                    StreamInput::Finalize => match serde_json::to_string(&ClientMessage::Finalize) {
                        Ok(text) => Message::Text(text.into()),
                        Err(e) => {
                            let _ = events.send(StreamEvent::Failed(
                                SttError::Transport(format!("encode finalize: {e}")),
                            )).await;
                            break;
                        }
                    },
                };
                if let Err(e) = ws_tx.send(msg).await {
                    let _ = events.send(StreamEvent::Failed(
                        SttError::Transport(format!("send: {e}")),
                    )).await;
                    break;
                }
            }

            msg = ws_rx.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => match event_for_text(text.as_str()) {
                        Ok(event) => event,
                        Err(err) => Some(StreamEvent::Failed(err)),
                    },
                    // Frames we do not speak; tungstenite answers pings itself.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => None,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "service closed without end of results");
                        Some(StreamEvent::Failed(SttError::Transport(
                            "connection closed without end of results".into(),
                        )))
                    }
                    Some(Err(e)) => Some(StreamEvent::Failed(SttError::Transport(e.to_string()))),
                    None => Some(StreamEvent::Failed(SttError::Transport(
                        "connection reset".into(),
                    ))),
                };
                if let Some(event) = event {
                    let done = matches!(event, StreamEvent::End | StreamEvent::Failed(_));
                    if events.send(event).await.is_err() || done {
                        break;
                    }
                }
            }
        }
    }

    if let Ok(mut ws) = ws_rx.reunite(ws_tx) {
        if let Err(e) = ws.close(None).await {
            debug!(error = %e, "close frame not delivered");
        }
    }
}

fn parse_server_message(raw: &str) -> Result<ServerMessage, SttError> {
    serde_json::from_str(raw)
        .map_err(|e| SttError::Transport(format!("malformed service message: {e}")))
}

/// Translate one text frame into a stream event. `None` for messages that
/// carry nothing for the session.
fn event_for_text(raw: &str) -> Result<Option<StreamEvent>, SttError> {
    let event = match parse_server_message(raw)? {
        // A second ack is harmless; swallow it.
        ServerMessage::Started => {
            warn!("unexpected acknowledgement mid-stream");
            None
        }
        ServerMessage::Result {
            transcript,
            confidence: _,
            is_final: false,
            end_ms,
        } => Some(StreamEvent::Partial {
            text: transcript,
            end_ms,
        }),
        ServerMessage::Result {
            transcript,
            confidence,
            is_final: true,
            end_ms,
        } => Some(StreamEvent::Final(TranscriptSegment {
            text: transcript,
            confidence: confidence.unwrap_or(0.0),
            end_ms,
        })),
        ServerMessage::Closing { reason } => Some(StreamEvent::Closing { reason }),
        ServerMessage::End => Some(StreamEvent::End),
        ServerMessage::Error { code, message } => {
            Some(StreamEvent::Failed(error_for_code(&code, &message)))
        }
    };
    Ok(event)
}

fn map_connect_error(err: tungstenite::Error) -> SttError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SttError::Auth(AuthError::Rejected(format!("service returned {status}")))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    SttError::Quota(format!("service returned {status}"))
                }
                _ => SttError::Transport(format!("handshake failed with {status}")),
            }
        }
        other => SttError::Transport(other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
