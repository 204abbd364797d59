//! Message store bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest accepted message TTL: one year.
pub const MAX_MESSAGE_TTL_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Message store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Time-to-live of a stored message, in ms.
    pub message_ttl_ms: u64,
    /// Maximum number of messages held at once.
    pub max_messages: usize,
    /// Interval of the background expiry sweep, in ms.
    pub sweep_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            message_ttl_ms: 300_000,
            max_messages: 100,
            sweep_interval_ms: 60_000,
        }
    }
}

impl StoreSettings {
    /// TTL as a `chrono::Duration`, which is what message stamps use.
    /// Clamped to [`MAX_MESSAGE_TTL_MS`].
    #[allow(clippy::cast_possible_wrap)]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.message_ttl_ms.min(MAX_MESSAGE_TTL_MS) as i64)
    }

    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_clamped() {
        let settings = StoreSettings {
            message_ttl_ms: u64::MAX,
            ..StoreSettings::default()
        };
        assert_eq!(
            settings.ttl(),
            chrono::Duration::milliseconds(MAX_MESSAGE_TTL_MS as i64)
        );
    }
}
