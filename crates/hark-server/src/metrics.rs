//! Prometheus recorder installation and ingress metric names.
//!
//! Bridge-level metrics (utterances, swaps, replay) live in `hark-bridge`;
//! this module covers the TCP ingress side and owns the global recorder.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Install the global Prometheus recorder with a scrape listener on `addr`.
///
/// Must be called once at startup, inside a Tokio runtime, before any
/// metrics are recorded.
pub fn serve(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "prometheus scrape listener installed");
    Ok(())
}

// Metric name constants to avoid typos across modules.

/// Client connections opened total (counter).
pub const CONNECTIONS_TOTAL: &str = "connections_total";
/// Client disconnections total (counter).
pub const DISCONNECTIONS_TOTAL: &str = "disconnections_total";
/// Active client connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
/// Connection duration seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "connection_duration_seconds";
/// Ingress frames total (counter, labels: kind).
pub const FRAMES_TOTAL: &str = "frames_total";
/// Ingress framing errors total (counter, labels: fatal).
pub const FRAME_ERRORS_TOTAL: &str = "frame_errors_total";
/// Client protocol violations total (counter).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";
