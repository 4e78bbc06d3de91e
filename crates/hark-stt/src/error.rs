//! Errors produced by the speech-service client.

use hark_core::ErrorKind;

use crate::auth::AuthError;

/// Failure opening or driving a recognizer stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SttError {
    /// Credential invalid, expired, or rejected by the service.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The service refused the stream for quota reasons.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// The service rejected the negotiated configuration.
    #[error("invalid recognizer config: {0}")]
    Config(String),

    /// Connection reset, deadline exceeded, or other network-level failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The stream's transport task is gone; writes can no longer be
    /// delivered.
    #[error("stream closed")]
    StreamClosed,
}

impl SttError {
    /// The taxonomy kind this error maps to on egress.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Quota(_) => ErrorKind::Quota,
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) | Self::StreamClosed => ErrorKind::Transport,
        }
    }

    /// Whether the continuity manager may retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}
