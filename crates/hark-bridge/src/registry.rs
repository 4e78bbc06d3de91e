//! Who is speaking right now: the connection → utterance claim table.
//!
//! A connection may run at most one utterance at a time. The registry is the
//! single authority for that rule: ingress claims a slot before spawning a
//! session, releases it when the session ends, and the server cancels the
//! claim (and with it the session) when the connection drops mid-utterance.

use std::collections::HashMap;

use hark_core::{ConnectionId, UtteranceId};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Claim rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The connection already has an utterance in flight.
    #[error("connection already has an active utterance ({0})")]
    AlreadyActive(UtteranceId),
}

#[derive(Debug)]
struct Active {
    utterance: UtteranceId,
    cancel: CancellationToken,
}

/// Tracks the active utterance per connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: RwLock<HashMap<ConnectionId, Active>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the connection's utterance slot.
    ///
    /// `cancel` must stop the session when triggered; the registry fires it
    /// on [`cancel_connection`](Self::cancel_connection).
    pub async fn claim(
        &self,
        conn: &ConnectionId,
        utterance: UtteranceId,
        cancel: CancellationToken,
    ) -> Result<(), ClaimError> {
        let mut active = self.active.write().await;
        if let Some(existing) = active.get(conn) {
            return Err(ClaimError::AlreadyActive(existing.utterance.clone()));
        }
        debug!(connection = %conn, utterance = %utterance, "utterance slot claimed");
        let _ = active.insert(conn.clone(), Active { utterance, cancel });
        Ok(())
    }

    /// Release the slot once the utterance ends.
    ///
    /// Releases only the named utterance; a release racing a cancellation
    /// (or a stale release after a re-claim) is a no-op.
    pub async fn release(&self, conn: &ConnectionId, utterance: &UtteranceId) {
        let mut active = self.active.write().await;
        if active.get(conn).is_some_and(|a| a.utterance == *utterance) {
            debug!(connection = %conn, utterance = %utterance, "utterance slot released");
            let _ = active.remove(conn);
        }
    }

    /// Cancel whatever utterance the connection is running, if any.
    ///
    /// Called when the connection drops; the session sees its cancel token
    /// fire and stops without emitting further events.
    pub async fn cancel_connection(&self, conn: &ConnectionId) {
        let removed = self.active.write().await.remove(conn);
        if let Some(active) = removed {
            info!(connection = %conn, utterance = %active.utterance, "cancelling utterance for dropped connection");
            active.cancel.cancel();
        }
    }

    /// Cancel every active utterance. Used at shutdown.
    pub async fn cancel_all(&self) {
        let mut active = self.active.write().await;
        for (conn, entry) in active.drain() {
            info!(connection = %conn, utterance = %entry.utterance, "cancelling utterance for shutdown");
            entry.cancel.cancel();
        }
    }

    /// Whether the connection has an utterance in flight.
    pub async fn is_active(&self, conn: &ConnectionId) -> bool {
        self.active.read().await.contains_key(conn)
    }

    /// Number of utterances in flight across all connections.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
