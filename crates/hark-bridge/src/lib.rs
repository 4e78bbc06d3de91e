//! # hark-bridge
//!
//! The utterance engine: everything between framed client audio and
//! client-facing transcript events.
//!
//! One utterance is one [`UtteranceSession`] task. It opens a recognition
//! stream through the continuity manager, forwards audio with bounded
//! buffering, and turns stream results into ordered `Partial`/`Final`
//! events. When the remote service's per-stream duration cap approaches,
//! or the transport fails mid-stream, the session hot-swaps to a fresh
//! stream and replays the trailing unfinalized audio window so no speech
//! is lost at the seam; the result emitter deduplicates whatever the
//! replayed window gets re-recognized as.

#![deny(unsafe_code)]

pub mod continuity;
pub mod emitter;
pub mod metrics;
pub mod registry;
pub mod replay;
pub mod session;

pub use continuity::{ContinuityManager, Swap};
pub use emitter::{ResultEmitter, UtteranceEvent};
pub use registry::{ClaimError, SessionRegistry};
pub use replay::{DEFAULT_REPLAY_WINDOW_MS, ReplayBuffer};
pub use session::{AudioInput, SessionLimits, SessionOutcome, SessionState, UtteranceSession};
