//! Recognized envelope `type` discriminators.
//!
//! The set is open: the server may push types not listed here and they still
//! flow through the bus and the store untouched.

/// Wildcard subscription key; matches every emitted event.
pub const WILDCARD: &str = "*";

/// Client heartbeat.
pub const PING: &str = "ping";
/// Server heartbeat reply.
pub const PONG: &str = "pong";

/// Node discovery is running.
pub const DISCOVERY_PROGRESS: &str = "discovery_progress";
/// Node discovery finished successfully.
pub const DISCOVERY_SUCCESS: &str = "discovery_success";
/// Node discovery failed.
pub const DISCOVERY_FAILED: &str = "discovery_failed";

/// A scan task was started.
pub const SCAN_STARTED: &str = "scan_started";
/// A scan task reported progress.
pub const SCAN_PROGRESS: &str = "scan_progress";
/// A scan task completed.
pub const SCAN_COMPLETED: &str = "scan_completed";
/// A scan task failed.
pub const SCAN_FAILED: &str = "scan_failed";

/// User-facing notification.
pub const NOTIFICATION: &str = "notification";

/// All node discovery event types.
pub const DISCOVERY_EVENTS: [&str; 3] = [DISCOVERY_PROGRESS, DISCOVERY_SUCCESS, DISCOVERY_FAILED];

/// All scan lifecycle event types.
pub const SCAN_EVENTS: [&str; 4] = [SCAN_STARTED, SCAN_PROGRESS, SCAN_COMPLETED, SCAN_FAILED];
