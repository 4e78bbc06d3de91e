//! Message vocabulary of the recognizer WebSocket.
//!
//! Text frames carry one JSON message each, tagged by `type`; binary frames
//! carry raw audio and never appear here. The client speaks on open and at
//! end of speech, the service speaks for everything else.

use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::config::RecognizerConfig;
use crate::error::SttError;

/// Error codes the service puts in `error` messages.
pub mod error_code {
    /// Bearer token missing, invalid, or expired.
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    /// Account or project quota exhausted.
    pub const QUOTA_EXHAUSTED: &str = "quota_exhausted";
    /// The `start` configuration was rejected.
    pub const INVALID_CONFIG: &str = "invalid_config";
    /// Unspecified service-side failure.
    pub const INTERNAL: &str = "internal";
}

/// Messages the bridge sends to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the recognition session. Must be the first message.
    Start {
        /// Recognition parameters, flattened into the message body.
        #[serde(flatten)]
        config: RecognizerConfig,
    },
    /// No more audio will follow; flush remaining results and end.
    Finalize,
}

/// Messages the service sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The `start` configuration was accepted; audio may flow.
    Started,
    /// One recognition hypothesis.
    #[serde(rename_all = "camelCase")]
    Result {
        /// Recognized text so far.
        transcript: String,
        /// Confidence in `[0, 1]`. Only meaningful on final results.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        /// Whether this hypothesis will not be revised further.
        is_final: bool,
        /// Audio time covered by this result, ms from stream start.
        end_ms: u64,
    },
    /// Advisory notice that the service will close the stream soon.
    Closing {
        /// Service-side reason, e.g. a session-duration cap.
        reason: String,
    },
    /// End of results. Nothing further will arrive on this stream.
    End,
    /// Recognition failed.
    Error {
        /// Machine-readable code, see [`error_code`].
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

/// Map a service `error` message onto the client error taxonomy.
#[must_use]
pub fn error_for_code(code: &str, message: &str) -> SttError {
    match code {
        error_code::UNAUTHENTICATED => SttError::Auth(AuthError::Rejected(message.to_string())),
        error_code::QUOTA_EXHAUSTED => SttError::Quota(message.to_string()),
        error_code::INVALID_CONFIG => SttError::Config(message.to_string()),
        _ => SttError::Transport(format!("{code}: {message}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hark_core::{AudioEncoding, AudioFormat, ErrorKind};

    #[test]
    fn start_flattens_config() {
        let config = RecognizerConfig::new(AudioFormat::new(16_000, AudioEncoding::Linear16, 1))
            .with_language("en-GB");
        let json = serde_json::to_value(ClientMessage::Start { config }).unwrap();

        assert_eq!(json["type"], "start");
        assert_eq!(json["language"], "en-GB");
        assert_eq!(json["sampleRate"], 16_000);
        assert_eq!(json["model"], "latest_short");
    }

    #[test]
    fn finalize_is_bare() {
        let json = serde_json::to_string(&ClientMessage::Finalize).unwrap();
        assert_eq!(json, r#"{"type":"finalize"}"#);
    }

    #[test]
    fn parses_partial_result() {
        let raw = r#"{"type":"result","transcript":"turn on","isFinal":false,"endMs":640}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Result {
                transcript: "turn on".into(),
                confidence: None,
                is_final: false,
                end_ms: 640,
            }
        );
    }

    #[test]
    fn parses_final_result_with_confidence() {
        let raw = r#"{"type":"result","transcript":"turn on the lights","confidence":0.93,"isFinal":true,"endMs":1820}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::Result {
                confidence,
                is_final,
                end_ms,
                ..
            } => {
                assert_eq!(confidence, Some(0.93));
                assert!(is_final);
                assert_eq!(end_ms, 1820);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_lifecycle_messages() {
        let started: ServerMessage = serde_json::from_str(r#"{"type":"started"}"#).unwrap();
        assert_eq!(started, ServerMessage::Started);

        let end: ServerMessage = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert_eq!(end, ServerMessage::End);

        let closing: ServerMessage =
            serde_json::from_str(r#"{"type":"closing","reason":"session cap"}"#).unwrap();
        assert_eq!(
            closing,
            ServerMessage::Closing {
                reason: "session cap".into()
            }
        );
    }

    #[test]
    fn error_codes_map_to_taxonomy() {
        let auth = error_for_code(error_code::UNAUTHENTICATED, "bad token");
        assert_eq!(auth.kind(), ErrorKind::Auth);

        let quota = error_for_code(error_code::QUOTA_EXHAUSTED, "limit reached");
        assert_eq!(quota.kind(), ErrorKind::Quota);

        let config = error_for_code(error_code::INVALID_CONFIG, "bad rate");
        assert_eq!(config.kind(), ErrorKind::Config);

        let internal = error_for_code(error_code::INTERNAL, "oops");
        assert_eq!(internal.kind(), ErrorKind::Transport);
        assert!(internal.is_transient());

        let unknown = error_for_code("mystery", "???");
        assert_eq!(unknown.kind(), ErrorKind::Transport);
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let res = serde_json::from_str::<ServerMessage>(r#"{"type":"surprise"}"#);
        assert!(res.is_err());
    }
}
