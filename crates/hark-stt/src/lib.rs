//! # hark-stt
//!
//! Client side of the remote speech-recognition service.
//!
//! The bridge talks to the recognizer over a duplex WebSocket: the HTTP
//! upgrade carries a bearer token, the first text message carries the
//! recognition configuration, binary messages carry raw audio, and text
//! messages back carry results and lifecycle notices. This crate provides:
//!
//! - **Credentials**: the `CredentialProvider` seam plus static-token and
//!   credentials-file implementations
//! - **Config**: `RecognizerConfig` built from the negotiated audio format,
//!   language, model, and phrase-boost hints
//! - **Wire**: the message vocabulary both directions
//! - **Transport**: the `SpeechService` trait, the channel-backed
//!   `RemoteStream` handle, and the `WsSpeechService` implementation

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod service;
pub mod wire;
pub mod ws;

pub use auth::{AuthError, AuthToken, CredentialProvider, CredentialsFile, StaticCredentials};
pub use config::{RecognizerConfig, SpeechContext};
pub use error::SttError;
pub use service::{RemoteStream, SpeechService, StreamEvent, StreamInput};
pub use ws::WsSpeechService;
