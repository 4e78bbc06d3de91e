//! Metric name constants for the utterance engine.
//!
//! The Prometheus recorder itself is installed by the server binary; this
//! module only pins the names so emit sites cannot drift apart.

/// Utterances completed total (counter, labels: outcome).
pub const UTTERANCES_TOTAL: &str = "utterances_total";
/// Utterance wall-clock duration seconds (histogram).
pub const UTTERANCE_DURATION_SECONDS: &str = "utterance_duration_seconds";
/// Audio milliseconds forwarded to the recognizer total (counter).
pub const AUDIO_FORWARDED_MS_TOTAL: &str = "audio_forwarded_ms_total";
/// Recognition results received total (counter, labels: kind).
pub const RESULTS_TOTAL: &str = "results_total";
/// Hot swaps performed total (counter, labels: trigger).
pub const SWAPS_TOTAL: &str = "swaps_total";
/// Hot swap failures total (counter).
pub const SWAP_FAILURES_TOTAL: &str = "swap_failures_total";
/// Audio milliseconds replayed into successor streams total (counter).
pub const REPLAYED_MS_TOTAL: &str = "replayed_ms_total";
/// Stream open attempts total (counter, labels: result).
pub const STREAM_OPENS_TOTAL: &str = "stream_opens_total";
