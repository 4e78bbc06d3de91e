//! `BridgeServer` — the TCP listener and shared per-connection state.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hark_bridge::{ContinuityManager, SessionLimits, SessionRegistry};
use hark_core::ConnectionId;
use hark_stt::{CredentialProvider, SpeechService};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection;
use crate::protocol::InfoPayload;
use crate::settings::Settings;
use crate::shutdown::ShutdownCoordinator;

/// Shared state handed to every connection task.
pub struct ServerState {
    registry: SessionRegistry,
    continuity: ContinuityManager,
    limits: SessionLimits,
    settings: Settings,
    info: InfoPayload,
}

impl ServerState {
    fn new(
        settings: Settings,
        service: Arc<dyn SpeechService>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let continuity = ContinuityManager::new(service, credentials)
            .with_policy(settings.continuity.reconnect.clone())
            .with_stream_budget(
                settings.continuity.max_stream(),
                settings.continuity.swap_margin(),
            );
        let limits = settings.session_limits();

        let mut languages = vec![settings.recognizer.default_language.clone()];
        languages.extend(settings.recognizer.alternative_languages.iter().cloned());
        let info = InfoPayload {
            name: "hark".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            languages,
            model: settings.recognizer.model.clone(),
        };

        Self {
            registry: SessionRegistry::new(),
            continuity,
            limits,
            settings,
            info,
        }
    }

    /// One-utterance-per-connection bookkeeping.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Stream opener shared by every utterance. Cloned per session.
    #[must_use]
    pub fn continuity(&self) -> &ContinuityManager {
        &self.continuity
    }

    /// Per-utterance limits derived from settings.
    #[must_use]
    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// The resolved configuration tree.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Payload for `describe` replies.
    #[must_use]
    pub fn info(&self) -> &InfoPayload {
        &self.info
    }
}

/// The transcription bridge server.
pub struct BridgeServer {
    state: Arc<ServerState>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl BridgeServer {
    /// Create a server from resolved settings and recognizer plumbing.
    #[must_use]
    pub fn new(
        settings: Settings,
        service: Arc<dyn SpeechService>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            state: Arc::new(ServerState::new(settings, service, credentials)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind the configured address and start accepting clients.
    ///
    /// Returns the bound address (useful with port 0) and the accept-loop
    /// task, which finishes after shutdown has drained the connections.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.settings().server.bind.as_str()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening for clients");

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let grace = state.settings().server.shutdown_grace();
        let handle = tokio::spawn(async move {
            accept_loop(listener, state, shutdown, grace).await;
        });
        Ok((addr, handle))
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: Arc<ShutdownCoordinator>,
    grace: Duration,
) {
    let token = shutdown.token();
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    connections.retain(|task| !task.is_finished());
                    // Partials are latency-sensitive.
                    let _ = socket.set_nodelay(true);
                    let conn = ConnectionId::new();
                    connections.push(spawn_connection(socket, peer, conn, &state, &token));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    info!("listener stopped accepting");
    state.registry().cancel_all().await;
    shutdown.graceful_shutdown(connections, Some(grace)).await;
}

fn spawn_connection(
    socket: tokio::net::TcpStream,
    peer: SocketAddr,
    conn: ConnectionId,
    state: &Arc<ServerState>,
    token: &CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(connection::run_connection(
        socket,
        peer,
        conn,
        state.clone(),
        token.clone(),
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
