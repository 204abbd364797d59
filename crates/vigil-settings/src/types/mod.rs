//! Settings types, grouped by the component that consumes them.

mod connection;
mod store;
mod tracker;

pub use connection::ConnectionSettings;
pub use store::{MAX_MESSAGE_TTL_MS, StoreSettings};
pub use tracker::TrackerSettings;
pub use vigil_core::retry::ReconnectPolicy;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Log output.
    pub logging: LoggingSettings,
    /// WebSocket connection manager.
    pub connection: ConnectionSettings,
    /// Message store bounds.
    pub store: StoreSettings,
    /// Scan tracker polling.
    pub tracker: TrackerSettings,
}

impl VigilSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.store.max_messages == 0 {
            return Err(SettingsError::InvalidValue(
                "store.maxMessages must be at least 1".into(),
            ));
        }
        if self.store.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "store.sweepIntervalMs must be non-zero".into(),
            ));
        }
        if self.store.message_ttl_ms > MAX_MESSAGE_TTL_MS {
            return Err(SettingsError::InvalidValue(format!(
                "store.messageTtlMs must be at most {MAX_MESSAGE_TTL_MS}"
            )));
        }
        if self.tracker.poll_interval_ms == 0 || self.tracker.task_poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "tracker poll intervals must be non-zero".into(),
            ));
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.heartbeatIntervalMs must be non-zero".into(),
            ));
        }
        if self.connection.liveness_check_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.livenessCheckIntervalMs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
