//! The error taxonomy shared by every layer of the bridge.
//!
//! Concrete error enums live in the crates that produce them; this is the
//! classification they all map onto, and the shape the client sees in a
//! terminal `error` egress event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a bridge failure.
///
/// Only `Transport` is transient: the continuity manager recovers it with a
/// bounded hot-swap retry loop, invisibly to the client unless retries
/// exhaust. Every other kind is terminal for the utterance and surfaces as
/// exactly one egress `error` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or out-of-order client messages. The offending frame is
    /// rejected; no session state is created or touched.
    Protocol,
    /// Credential invalid or expired. Never retried.
    Auth,
    /// Remote service limit reached. Never retried.
    Quota,
    /// Network reset or deadline exceeded mid-stream. Retried via hot swap.
    Transport,
    /// Invalid negotiated parameters.
    Config,
}

impl ErrorKind {
    /// Whether the continuity manager may retry this kind.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transport)
    }

    /// Stable string form used in egress frames and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Transport => "transport",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
