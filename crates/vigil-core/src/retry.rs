//! Reconnect backoff calculation.
//!
//! Portable, sync-only building blocks for the connection manager's retry
//! schedule:
//!
//! - [`ReconnectPolicy`]: base delay, cap, jitter and exponent ceiling
//! - [`exponential_delay_ms`]: the capped exponential part
//! - [`calculate_backoff_delay_with_random`]: exponential plus additive jitter
//!
//! Attempts are 1-based: the first retry after a drop is attempt 1 and waits
//! roughly the base delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default delay cap in milliseconds (before jitter).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor; the delay grows by up to this fraction.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;
/// Default ceiling on the doubling exponent.
pub const DEFAULT_MAX_EXPONENT: u32 = 6;

/// Reconnect schedule parameters. There is no attempt ceiling; retries
/// continue until the caller disconnects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Cap applied to the exponential part, in ms.
    pub max_delay_ms: u64,
    /// Additive jitter fraction (0.0–1.0).
    pub jitter_factor: f64,
    /// The exponent stops growing after this many doublings.
    pub max_exponent: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_exponent: DEFAULT_MAX_EXPONENT,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for `attempt` using a fresh random jitter sample.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self,
            rand::random::<f64>(),
        ))
    }

    /// Lower bound of the delay for `attempt` (zero jitter).
    pub fn min_delay_ms(&self, attempt: u32) -> u64 {
        exponential_delay_ms(attempt, self.base_delay_ms, self.max_delay_ms, self.max_exponent)
    }

    /// Upper bound of the delay for `attempt` (full jitter).
    pub fn max_delay_ms_for(&self, attempt: u32) -> u64 {
        calculate_backoff_delay_with_random(attempt, self, 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Capped exponential delay: `min(max_delay, base * 2^min(attempt - 1, max_exponent))`.
#[must_use]
pub fn exponential_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_exponent: u32,
) -> u64 {
    let exponent = attempt.saturating_sub(1).min(max_exponent).min(31);
    base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(max_delay_ms)
}

/// Backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)`; it maps to a multiplier in
/// `[1.0, 1.0 + jitter_factor)`, so jitter only ever lengthens the delay.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    policy: &ReconnectPolicy,
    random: f64,
) -> u64 {
    let capped = exponential_delay_ms(
        attempt,
        policy.base_delay_ms,
        policy.max_delay_ms,
        policy.max_exponent,
    );
    let jitter = 1.0 + random.clamp(0.0, 1.0) * policy.jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).floor().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
