//! Application-root errors.

use thiserror::Error;
use vigil_realtime::ConnectionError;
use vigil_settings::SettingsError;
use vigil_tracker::TrackerError;

/// Errors from building or starting a [`DashboardContext`](crate::DashboardContext).
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Settings could not be loaded.
    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
    /// The first connection attempt failed. Reconnection continues in the
    /// background unless the URL itself is invalid.
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
    /// The tracker could not be built.
    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),
}

/// Result type for application-root operations.
pub type Result<T> = std::result::Result<T, DashboardError>;
