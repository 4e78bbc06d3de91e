//! # hark
//!
//! Streaming transcription bridge binary. Wires settings, credentials, the
//! WebSocket recognizer client, and the TCP server together, then runs until
//! ctrl-c.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use hark_server::server::BridgeServer;
use hark_server::settings::{Settings, default_settings_path, load_settings_from_path};
use hark_stt::{AuthToken, CredentialProvider, CredentialsFile, StaticCredentials, WsSpeechService};

/// Streaming transcription bridge.
#[derive(Parser, Debug)]
#[command(name = "hark", about = "Streaming transcription bridge", version)]
struct Cli {
    /// Address to serve on, e.g. `tcp://0.0.0.0:10300` or `0.0.0.0:10300`.
    #[arg(long)]
    uri: Option<String>,

    /// Settings file (defaults to `~/.hark/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default recognition language, e.g. `en-US`.
    #[arg(long)]
    language: Option<String>,

    /// Recognition model name.
    #[arg(long)]
    model: Option<String>,

    /// Recognizer WebSocket endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Static bearer token for the recognizer.
    #[arg(long)]
    token: Option<String>,

    /// JSON credentials file, re-read on every stream (wins over --token).
    #[arg(long)]
    credentials_file: Option<PathBuf>,

    /// Enable debug logging for the hark crates.
    #[arg(long)]
    debug: bool,
}

/// Reduce a `--uri` value to a bind address.
///
/// Accepts a bare `host:port` or a `tcp://` prefix; any other scheme is an
/// error rather than a silent fallback.
fn parse_bind_uri(uri: &str) -> Result<String> {
    if let Some(rest) = uri.strip_prefix("tcp://") {
        return Ok(rest.to_string());
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        bail!("unsupported scheme {scheme:?} (only tcp:// is served)");
    }
    Ok(uri.to_string())
}

/// Fold CLI flags into the loaded settings. Flags win over both the settings
/// file and `HARK_*` env vars.
fn apply_cli_overrides(settings: &mut Settings, cli: &Cli) -> Result<()> {
    if let Some(ref uri) = cli.uri {
        settings.server.bind = parse_bind_uri(uri)?;
    }
    if let Some(ref language) = cli.language {
        settings.recognizer.default_language = language.clone();
    }
    if let Some(ref model) = cli.model {
        settings.recognizer.model = model.clone();
    }
    if let Some(ref endpoint) = cli.endpoint {
        settings.recognizer.endpoint = endpoint.clone();
    }
    if let Some(ref token) = cli.token {
        settings.credentials.token = Some(token.clone());
    }
    if let Some(ref file) = cli.credentials_file {
        settings.credentials.file = Some(file.clone());
    }
    if cli.debug {
        settings.debug_logging = true;
    }
    Ok(())
}

/// Default `RUST_LOG`-style filter when the env var is unset.
fn default_log_filter(debug: bool) -> String {
    if debug {
        "info,hark=debug,hark_server=debug,hark_bridge=debug,hark_stt=debug".to_string()
    } else {
        "info".to_string()
    }
}

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` wins over the settings-derived default filter.
fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(debug)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a subscriber is already set
    let _ = subscriber.try_init();
}

/// Pick the credential source. A credentials file wins over a static token so
/// rotation keeps working even when both are configured.
fn credential_provider(settings: &Settings) -> Result<Arc<dyn CredentialProvider>> {
    if let Some(ref file) = settings.credentials.file {
        return Ok(Arc::new(CredentialsFile::new(file.clone())));
    }
    if let Some(ref token) = settings.credentials.token {
        return Ok(Arc::new(StaticCredentials::new(AuthToken::new(
            token.clone(),
        ))));
    }
    bail!("no recognizer credentials configured; pass --token or --credentials-file (or set HARK_TOKEN)")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    apply_cli_overrides(&mut settings, &cli)?;

    init_logging(settings.debug_logging);

    if settings.metrics.enabled {
        let addr: SocketAddr = settings
            .metrics
            .bind
            .parse()
            .with_context(|| format!("invalid metrics bind address {:?}", settings.metrics.bind))?;
        hark_server::metrics::serve(addr).context("failed to start metrics exporter")?;
    }

    let credentials = credential_provider(&settings)?;
    let service = Arc::new(
        WsSpeechService::new(settings.recognizer.endpoint.clone())
            .with_connect_timeout(settings.recognizer.connect_timeout()),
    );

    let server = BridgeServer::new(settings, service, credentials);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("hark listening on tcp://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
