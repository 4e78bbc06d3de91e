//! Frame vocabulary spoken with the voice-assistant client.
//!
//! Every frame is one JSON header object on its own line, `type`-tagged in
//! snake_case with camelCase fields. A header carrying `payloadLength` is
//! followed by exactly that many raw bytes (only `audio_chunk` does this).
//! The same framing runs both directions; egress frames never carry a
//! payload.

use bytes::Bytes;
use hark_bridge::UtteranceEvent;
use hark_core::{AudioFormat, ErrorKind, TranscriptEvent};
use serde::{Deserialize, Serialize};

/// Recognition parameters announced by a `start` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceConfig {
    /// Language override for this utterance. Falls back to the connection's
    /// `transcribe` override, then the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Audio parameters (`sampleRate` required, `encoding` and `channels`
    /// defaulted).
    #[serde(flatten)]
    pub format: AudioFormat,
    /// Phrases to boost in recognition for this utterance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phrase_boosts: Vec<String>,
}

impl UtteranceConfig {
    /// Config with everything defaulted except the audio format.
    #[must_use]
    pub fn new(format: AudioFormat) -> Self {
        Self {
            language: None,
            format,
            phrase_boosts: Vec::new(),
        }
    }
}

/// One parsed client frame, payload attached.
#[derive(Clone, Debug, PartialEq)]
pub enum IngressFrame {
    /// Service discovery request; answered with [`EgressFrame::Info`].
    Describe,
    /// Language override for the next utterance on this connection.
    /// `None` clears a previous override.
    Transcribe {
        /// BCP-47 language tag.
        language: Option<String>,
    },
    /// Open an utterance.
    Start(UtteranceConfig),
    /// Raw audio for the active utterance.
    AudioChunk(Bytes),
    /// Close the active utterance and flush results.
    Stop,
}

/// Frame header as found on the wire: the tagged kind plus the optional
/// payload length announcement.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FrameHeader {
    #[serde(flatten)]
    pub(crate) kind: FrameKind,
    #[serde(default)]
    pub(crate) payload_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum FrameKind {
    Describe,
    Transcribe {
        #[serde(default)]
        language: Option<String>,
    },
    Start(UtteranceConfig),
    AudioChunk,
    Stop,
}

/// What the bridge answers a `describe` with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoPayload {
    /// Service name.
    pub name: String,
    /// Service version.
    pub version: String,
    /// Languages the active configuration recognizes.
    pub languages: Vec<String>,
    /// Recognition model in use.
    pub model: String,
}

/// One frame from the bridge to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EgressFrame {
    /// Reply to `describe`.
    Info(InfoPayload),
    /// Revisable hypothesis for the active utterance.
    Partial {
        /// Text recognized so far.
        text: String,
    },
    /// Finalized span of the active utterance.
    Final {
        /// Finalized text.
        text: String,
        /// Recognizer confidence, 0.0 when the service omits it.
        confidence: f32,
    },
    /// The utterance is complete; no further results follow.
    EndOfUtterance {
        /// Joined text of every finalized span.
        transcript: String,
    },
    /// A failure the client must see (terminal for the utterance, or a
    /// rejected frame).
    Error {
        /// Taxonomy kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl From<UtteranceEvent> for EgressFrame {
    fn from(event: UtteranceEvent) -> Self {
        match event {
            UtteranceEvent::Transcript(TranscriptEvent::Partial { text }) => Self::Partial { text },
            UtteranceEvent::Transcript(TranscriptEvent::Final { text, confidence }) => {
                Self::Final { text, confidence }
            }
            UtteranceEvent::EndOfUtterance { transcript } => Self::EndOfUtterance { transcript },
            UtteranceEvent::Error { kind, message } => Self::Error { kind, message },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
