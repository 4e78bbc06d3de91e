//! Incremental codec for the line-header + counted-payload framing.
//!
//! Decoding is a two-state machine: scan for the header's newline, parse
//! the JSON header, and if it announced a payload, wait for exactly that
//! many bytes. The codec never trusts the peer with memory: headers and
//! payloads are both capped, and an oversized announcement fails before a
//! single payload byte is buffered.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{EgressFrame, FrameHeader, FrameKind, IngressFrame};

/// Default cap on a single audio payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Cap on the header line. Headers are small JSON objects; anything near
/// this is garbage or a framing desync.
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// A frame that could not be decoded, or could not be written.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Header line is not a valid frame header.
    #[error("malformed frame header: {0}")]
    Json(#[from] serde_json::Error),
    /// No newline within the header cap.
    #[error("frame header exceeds {max} bytes")]
    HeaderTooLong {
        /// The cap that was exceeded.
        max: usize,
    },
    /// Announced payload is larger than the configured cap.
    #[error("payload of {len} bytes exceeds the {max} byte cap")]
    PayloadTooLarge {
        /// Announced length.
        len: usize,
        /// Configured cap.
        max: usize,
    },
    /// `audio_chunk` header without a `payloadLength`.
    #[error("audio_chunk frame did not announce a payload")]
    MissingPayload,
    /// Underlying transport failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the connection can keep reading after this error.
    ///
    /// A malformed header was consumed through its newline and a missing
    /// payload consumed nothing, so framing stays aligned. Everything else
    /// leaves the byte stream untrustworthy.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Json(_) | Self::MissingPayload => false,
            Self::HeaderTooLong { .. } | Self::PayloadTooLarge { .. } | Self::Io(_) => true,
        }
    }
}

#[derive(Debug)]
enum DecodeState {
    /// Scanning for the next header line.
    Header,
    /// Header parsed; waiting for its announced payload.
    Payload { kind: FrameKind, len: usize },
}

/// Codec for [`tokio_util::codec::Framed`] over the ingress socket.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Codec with a specific payload cap.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            state: DecodeState::Header,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

/// Attach a consumed payload to its header kind.
fn assemble(kind: FrameKind, payload: Option<Bytes>) -> Result<IngressFrame, FrameError> {
    match kind {
        FrameKind::Describe => Ok(IngressFrame::Describe),
        FrameKind::Transcribe { language } => Ok(IngressFrame::Transcribe { language }),
        FrameKind::Start(config) => Ok(IngressFrame::Start(config)),
        FrameKind::Stop => Ok(IngressFrame::Stop),
        FrameKind::AudioChunk => payload
            .map(IngressFrame::AudioChunk)
            .ok_or(FrameError::MissingPayload),
    }
}

impl Decoder for FrameCodec {
    type Item = IngressFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IngressFrame>, FrameError> {
        loop {
            match &mut self.state {
                DecodeState::Header => {
                    let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(FrameError::HeaderTooLong {
                                max: MAX_HEADER_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    let line = src.split_to(pos + 1);
                    let header: FrameHeader = serde_json::from_slice(&line[..pos])?;
                    match header.payload_length {
                        None => return assemble(header.kind, None).map(Some),
                        Some(len) if len > self.max_payload => {
                            return Err(FrameError::PayloadTooLarge {
                                len,
                                max: self.max_payload,
                            });
                        }
                        Some(len) => {
                            self.state = DecodeState::Payload {
                                kind: header.kind,
                                len,
                            };
                        }
                    }
                }
                DecodeState::Payload { len, .. } => {
                    let len = *len;
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    let DecodeState::Payload { kind, .. } =
                        std::mem::replace(&mut self.state, DecodeState::Header)
                    else {
                        unreachable!("state checked above");
                    };
                    // A payload announced on a non-audio frame has been
                    // consumed to keep framing aligned; only audio keeps it.
                    return assemble(kind, Some(payload)).map(Some);
                }
            }
        }
    }
}

impl Encoder<EgressFrame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: EgressFrame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let header = serde_json::to_vec(&frame)?;
        dst.reserve(header.len() + 1);
        dst.extend_from_slice(&header);
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<IngressFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decodes_consecutive_frames_from_one_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(
            &br#"{"type":"describe"}
{"type":"start","sampleRate":16000}
{"type":"stop"}
"#[..],
        );

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 3);
        assert_matches!(frames[0], IngressFrame::Describe);
        assert_matches!(&frames[1], IngressFrame::Start(c) if c.format.sample_rate == 16_000);
        assert_matches!(frames[2], IngressFrame::Stop);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_split_across_reads() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&br#"{"type":"desc"#[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ribe\"}\n");
        assert_matches!(
            codec.decode(&mut buf).unwrap(),
            Some(IngressFrame::Describe)
        );
    }

    #[test]
    fn payload_split_across_reads() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&br#"{"type":"audio_chunk","payloadLength":6}
abc"#[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"def");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, IngressFrame::AudioChunk(Bytes::from_static(b"abcdef")));
    }

    #[test]
    fn payload_bytes_are_never_parsed_as_headers() {
        // Payload containing newlines and JSON-looking bytes.
        let mut codec = FrameCodec::default();
        let payload = b"{\"type\":\"stop\"}\n\n\n";
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            format!("{{\"type\":\"audio_chunk\",\"payloadLength\":{}}}\n", payload.len())
                .as_bytes(),
        );
        buf.extend_from_slice(payload);
        buf.extend_from_slice(b"{\"type\":\"describe\"}\n");

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            IngressFrame::AudioChunk(Bytes::copy_from_slice(payload))
        );
        assert_matches!(frames[1], IngressFrame::Describe);
    }

    #[test]
    fn oversized_payload_announcement_is_fatal() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&br#"{"type":"audio_chunk","payloadLength":2048}
"#[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_matches!(err, FrameError::PayloadTooLarge { len: 2048, max: 1024 });
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_header_is_recoverable() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(
            &br#"{"type":"start"
{"type":"describe"}
"#[..],
        );

        let err = codec.decode(&mut buf).unwrap_err();
        assert_matches!(err, FrameError::Json(_));
        assert!(!err.is_fatal());

        // The bad line was consumed; the next frame decodes normally.
        assert_matches!(
            codec.decode(&mut buf).unwrap(),
            Some(IngressFrame::Describe)
        );
    }

    #[test]
    fn audio_chunk_without_payload_length_is_recoverable() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&br#"{"type":"audio_chunk"}
{"type":"stop"}
"#[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_matches!(err, FrameError::MissingPayload);
        assert!(!err.is_fatal());
        assert_matches!(codec.decode(&mut buf).unwrap(), Some(IngressFrame::Stop));
    }

    #[test]
    fn stray_payload_on_control_frame_is_consumed() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&br#"{"type":"stop","payloadLength":4}
abcd{"type":"describe"}
"#[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![IngressFrame::Stop, IngressFrame::Describe]);
    }

    #[test]
    fn unterminated_garbage_header_is_fatal() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(vec![b'x'; MAX_HEADER_BYTES + 1].as_slice());

        let err = codec.decode(&mut buf).unwrap_err();
        assert_matches!(err, FrameError::HeaderTooLong { .. });
        assert!(err.is_fatal());
    }

    #[test]
    fn crlf_terminated_headers_parse() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"describe\"}\r\n"[..]);
        assert_matches!(
            codec.decode(&mut buf).unwrap(),
            Some(IngressFrame::Describe)
        );
    }

    #[test]
    fn encoder_writes_one_header_line() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec
            .encode(
                EgressFrame::Partial {
                    text: "turn on".into(),
                },
                &mut dst,
            )
            .unwrap();

        let line = dst.as_ref();
        assert_eq!(line[line.len() - 1], b'\n');
        let value: serde_json::Value = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(value["type"], "partial");
        assert_eq!(value["text"], "turn on");
    }
}
