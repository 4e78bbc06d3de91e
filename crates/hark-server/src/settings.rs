//! Layered bridge configuration.
//!
//! Settings resolve in three layers, lowest priority first:
//! 1. compiled defaults
//! 2. a JSON settings file, deep-merged over the defaults
//! 3. `HARK_*` environment variables
//!
//! The binary applies CLI flags on top of all three.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::time::Duration;

use hark_bridge::SessionLimits;
use hark_bridge::continuity::{DEFAULT_MAX_STREAM, DEFAULT_SWAP_MARGIN};
use hark_bridge::replay::DEFAULT_REPLAY_WINDOW_MS;
use hark_bridge::session::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_WRITE_STALL};
use hark_core::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::codec::DEFAULT_MAX_PAYLOAD;

/// Port clients connect to when none is configured.
pub const DEFAULT_PORT: u16 = 10300;

/// Failure to load or parse the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file or merged tree is not valid settings JSON.
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete bridge configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// TCP listener and framing limits.
    pub server: ServerSettings,
    /// Remote recognizer endpoint and recognition defaults.
    pub recognizer: RecognizerSettings,
    /// Stream-cap hot-swap behavior.
    pub continuity: ContinuitySettings,
    /// How the bridge authenticates to the recognizer.
    pub credentials: CredentialSettings,
    /// Prometheus exposition.
    pub metrics: MetricsSettings,
    /// Raise bridge crates to debug-level logging.
    pub debug_logging: bool,
}

/// Listener-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// `host:port` the TCP listener binds.
    pub bind: String,
    /// Largest accepted audio payload per frame, in bytes.
    pub max_payload_bytes: usize,
    /// How long a stopped utterance may wait for trailing finals.
    pub drain_timeout_ms: u64,
    /// How long shutdown waits for connection tasks to drain.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            drain_timeout_ms: millis(DEFAULT_DRAIN_TIMEOUT),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerSettings {
    /// Drain limit as a [`Duration`].
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Shutdown grace as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Remote recognizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizerSettings {
    /// WebSocket endpoint of the recognition service.
    pub endpoint: String,
    /// Recognition model requested on every stream.
    pub model: String,
    /// Language used when the client does not negotiate one.
    pub default_language: String,
    /// Additional candidate languages offered to the recognizer.
    pub alternative_languages: Vec<String>,
    /// Phrases boosted for every utterance.
    pub phrase_boosts: Vec<String>,
    /// WebSocket connect handshake deadline in ms.
    pub connect_timeout_ms: u64,
    /// How long an audio write may stall before the stream is swapped.
    pub write_stall_ms: u64,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            endpoint: "wss://speech.hark.dev/v1/stream".to_owned(),
            model: hark_stt::config::DEFAULT_MODEL.to_owned(),
            default_language: hark_stt::config::DEFAULT_LANGUAGE.to_owned(),
            alternative_languages: Vec::new(),
            phrase_boosts: Vec::new(),
            connect_timeout_ms: millis(hark_stt::ws::DEFAULT_CONNECT_TIMEOUT),
            write_stall_ms: millis(DEFAULT_WRITE_STALL),
        }
    }
}

impl RecognizerSettings {
    /// Connect deadline as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Write-stall limit as a [`Duration`].
    #[must_use]
    pub fn write_stall(&self) -> Duration {
        Duration::from_millis(self.write_stall_ms)
    }
}

/// Stream-cap and reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContinuitySettings {
    /// Remote per-stream duration cap in seconds.
    pub max_stream_secs: u64,
    /// How long before the cap a swap is initiated, in seconds.
    pub swap_margin_secs: u64,
    /// Trailing audio retained for replay across a swap, in ms.
    pub replay_window_ms: u64,
    /// Backoff applied to successor connect attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for ContinuitySettings {
    fn default() -> Self {
        Self {
            max_stream_secs: DEFAULT_MAX_STREAM.as_secs(),
            swap_margin_secs: DEFAULT_SWAP_MARGIN.as_secs(),
            replay_window_ms: DEFAULT_REPLAY_WINDOW_MS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ContinuitySettings {
    /// Stream cap as a [`Duration`].
    #[must_use]
    pub fn max_stream(&self) -> Duration {
        Duration::from_secs(self.max_stream_secs)
    }

    /// Swap margin as a [`Duration`].
    #[must_use]
    pub fn swap_margin(&self) -> Duration {
        Duration::from_secs(self.swap_margin_secs)
    }
}

/// Recognizer credential configuration. At most one source is used; a
/// credentials file wins over a static token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialSettings {
    /// Static bearer token.
    pub token: Option<String>,
    /// JSON credentials file, re-read on every stream open.
    pub file: Option<PathBuf>,
}

/// Prometheus exposition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Whether the scrape listener is started.
    pub enabled: bool,
    /// `host:port` the scrape listener binds.
    pub bind: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:9464".to_owned(),
        }
    }
}

impl Settings {
    /// Per-utterance limits derived from the server and recognizer trees.
    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            drain_timeout: self.server.drain_timeout(),
            write_stall: self.recognizer.write_stall(),
            replay_window_ms: self.continuity.replay_window_ms,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Resolve the default settings file path (`~/.hark/settings.json`).
#[must_use]
pub fn default_settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".hark").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from_path(&default_settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Parsing is strict: integers must be in range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. An invalid value is
/// logged and ignored, leaving the file/default value in place.
pub fn apply_env_overrides(settings: &mut Settings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HARK_BIND") {
        settings.server.bind = v;
    }
    if let Some(v) = read_env_usize("HARK_MAX_PAYLOAD_BYTES", 1_024, 16_777_216) {
        settings.server.max_payload_bytes = v;
    }
    if let Some(v) = read_env_u64("HARK_DRAIN_TIMEOUT_MS", 100, 60_000) {
        settings.server.drain_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("HARK_SHUTDOWN_GRACE_MS", 100, 600_000) {
        settings.server.shutdown_grace_ms = v;
    }

    // ── Recognizer ──────────────────────────────────────────────────
    if let Some(v) = read_env_string("HARK_ENDPOINT") {
        settings.recognizer.endpoint = v;
    }
    if let Some(v) = read_env_string("HARK_MODEL") {
        settings.recognizer.model = v;
    }
    if let Some(v) = read_env_string("HARK_LANGUAGE") {
        settings.recognizer.default_language = v;
    }
    if let Some(v) = read_env_u64("HARK_CONNECT_TIMEOUT_MS", 100, 120_000) {
        settings.recognizer.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("HARK_WRITE_STALL_MS", 100, 60_000) {
        settings.recognizer.write_stall_ms = v;
    }

    // ── Continuity ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("HARK_MAX_STREAM_SECS", 10, 3_600) {
        settings.continuity.max_stream_secs = v;
    }
    if let Some(v) = read_env_u64("HARK_SWAP_MARGIN_SECS", 1, 60) {
        settings.continuity.swap_margin_secs = v;
    }
    if let Some(v) = read_env_u64("HARK_REPLAY_WINDOW_MS", 100, 30_000) {
        settings.continuity.replay_window_ms = v;
    }
    if let Some(v) = read_env_u32("HARK_RECONNECT_ATTEMPTS", 1, 20) {
        settings.continuity.reconnect.max_attempts = v;
    }

    // ── Credentials ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("HARK_TOKEN") {
        settings.credentials.token = Some(v);
    }
    if let Some(v) = read_env_string("HARK_CREDENTIALS_FILE") {
        settings.credentials.file = Some(PathBuf::from(v));
    }

    // ── Metrics and logging ─────────────────────────────────────────
    if let Some(v) = read_env_bool("HARK_METRICS_ENABLED") {
        settings.metrics.enabled = v;
    }
    if let Some(v) = read_env_string("HARK_METRICS_BIND") {
        settings.metrics.bind = v;
    }
    if let Some(v) = read_env_bool("HARK_DEBUG") {
        settings.debug_logging = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
#[must_use]
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
#[must_use]
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
#[must_use]
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
#[must_use]
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
