//! WebSocket connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::retry::ReconnectPolicy;

/// Connection manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket base URL; the client connects to `<base>/ws?token=...`.
    pub ws_base_url: String,
    /// Interval between client `ping` envelopes, in ms.
    pub heartbeat_interval_ms: u64,
    /// Interval between liveness checks, in ms.
    pub liveness_check_interval_ms: u64,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Reconnect backoff schedule.
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000".to_string(),
            heartbeat_interval_ms: 30_000,
            liveness_check_interval_ms: 60_000,
            outbound_buffer: 64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness check interval as a `Duration`.
    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }
}
