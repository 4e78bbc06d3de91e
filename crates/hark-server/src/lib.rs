//! # hark-server
//!
//! The client-facing half of the bridge: a framed TCP server speaking the
//! voice-assistant protocol (JSON header line, optional counted payload).
//! Each connection gets one handler task that enforces the start/stop
//! bracket, stamps audio time onto incoming chunks, and relays utterance
//! events back out. Everything recognition-related is delegated to
//! `hark-bridge`.
//!
//! - **Protocol**: ingress/egress frame vocabulary and the `info` payload
//! - **Codec**: incremental `FrameCodec` for `tokio_util::codec::Framed`
//! - **Connection**: per-socket read loop, writer task, bracket state
//! - **Server**: bind/accept/shutdown plumbing
//! - **Settings**: defaults ← JSON file ← `HARK_*` env, deep-merged

#![deny(unsafe_code)]

pub mod codec;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod shutdown;

pub use codec::{FrameCodec, FrameError};
pub use protocol::{EgressFrame, IngressFrame, InfoPayload, UtteranceConfig};
pub use server::{BridgeServer, ServerState};
pub use settings::Settings;
pub use shutdown::ShutdownCoordinator;
