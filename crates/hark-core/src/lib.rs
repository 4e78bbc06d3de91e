//! # hark-core
//!
//! Foundation types for the hark transcription bridge.
//!
//! This crate provides the shared vocabulary the other hark crates depend on:
//!
//! - **Branded IDs**: `ConnectionId`, `UtteranceId`, `StreamId` as newtypes
//! - **Audio**: `AudioFormat` byte/duration math and the `AudioChunk` unit of
//!   transfer between ingress and the recognizer stream
//! - **Transcripts**: `TranscriptEvent` (partial/final) and the append-only
//!   `TranscriptSegment` record
//! - **Errors**: the `ErrorKind` taxonomy shared by every layer
//! - **Reconnect policy**: bounded exponential backoff parameters and math

#![deny(unsafe_code)]

pub mod audio;
pub mod error;
pub mod ids;
pub mod retry;
pub mod transcript;

pub use audio::{AudioChunk, AudioEncoding, AudioFormat};
pub use error::ErrorKind;
pub use ids::{ConnectionId, StreamId, UtteranceId};
pub use retry::ReconnectPolicy;
pub use transcript::{TranscriptEvent, TranscriptSegment};
