//! Reconnect policy and backoff calculation for the continuity manager.
//!
//! The policy bounds how hard the bridge fights to keep one utterance alive
//! across transient transport failures. The schedule is deliberately short:
//! a live microphone stream is dead long before a multi-second wait pays
//! off, so the defaults cap out at two seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum reconnect attempts per failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Bounded-backoff parameters for hot-swap reconnects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Maximum consecutive reconnect attempts before the session fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0, applied symmetrically.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given zero-based attempt, with jitter from `random`
    /// in `[0.0, 1.0)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

/// Calculate exponential backoff delay without randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + jitter_factor)` —
/// the upper edge of the jittered range, useful for worst-case bounds.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter_range = (capped as f64) * jitter_factor;
    ((capped as f64) + jitter_range).round() as u64
}

/// Calculate backoff delay with explicit randomness.
///
/// `random` in `[0.0, 1.0)` maps to a jitter multiplier in
/// `[1 - jitter_factor, 1 + jitter_factor)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 2_000);
        assert!((policy.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 250);
    }

    #[test]
    fn policy_serde_camel_case() {
        let json = r#"{"maxAttempts":5,"baseDelayMs":100,"maxDelayMs":800,"jitterFactor":0.1}"#;
        let policy: ReconnectPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 100);
        assert_eq!(policy.max_delay_ms, 800);
    }

    #[test]
    fn backoff_exponential_growth() {
        assert_eq!(backoff_delay(0, 250, 10_000, 0.0), 250);
        assert_eq!(backoff_delay(1, 250, 10_000, 0.0), 500);
        assert_eq!(backoff_delay(2, 250, 10_000, 0.0), 1_000);
        assert_eq!(backoff_delay(3, 250, 10_000, 0.0), 2_000);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff_delay(10, 250, 2_000, 0.0), 2_000);
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let delay = backoff_delay(200, 250, 2_000, 0.2);
        assert!(delay > 0);
        assert!(delay <= 2_400);
    }

    #[test]
    fn backoff_with_random_edges() {
        // random = 0.0 → multiplier 0.8; random = 0.5 → 1.0; random → 1.0 edge → 1.2
        assert_eq!(backoff_delay_with_random(0, 1_000, 10_000, 0.2, 0.0), 800);
        assert_eq!(backoff_delay_with_random(0, 1_000, 10_000, 0.2, 0.5), 1_000);
        assert_eq!(backoff_delay_with_random(0, 1_000, 10_000, 0.2, 1.0), 1_200);
    }

    #[test]
    fn delay_for_uses_policy_fields() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 400,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(0, 0.5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, 0.5), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5, 0.5), Duration::from_millis(400));
    }

    proptest! {
        #[test]
        fn backoff_stays_within_jitter_bounds(
            attempt in 0u32..64,
            base in 1u64..5_000,
            max in 1u64..60_000,
            random in 0.0f64..1.0,
        ) {
            let delay = backoff_delay_with_random(attempt, base, max, 0.2, random);
            let capped = base.saturating_mul(1u64 << attempt.min(31)).min(max);
            let lower = ((capped as f64) * 0.8).floor() as u64;
            let upper = ((capped as f64) * 1.2).ceil() as u64;
            prop_assert!(delay >= lower);
            prop_assert!(delay <= upper);
        }
    }
}
