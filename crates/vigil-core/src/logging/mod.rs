//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide stderr subscriber
//! - [`test_utils::capture_logs`] captures events in memory for assertions
//!
//! Context (session id, event type, attempt number) is attached as structured
//! fields on each event rather than interpolated into the message.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Install the global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. With `json` the output
/// is one JSON object per line; otherwise the compact human format is used.
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
    }
}
