//! Scan tracker polling settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scan tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    /// Base URL that relative tracking URLs are resolved against.
    pub api_base_url: String,
    /// Session status poll interval, in ms.
    pub poll_interval_ms: u64,
    /// Per-task status poll interval, in ms.
    pub task_poll_interval_ms: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            poll_interval_ms: 2000,
            task_poll_interval_ms: 2000,
        }
    }
}

impl TrackerSettings {
    /// Session poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Task poll interval as a `Duration`.
    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }
}
