//! Event shortcut: scan events pushed over the socket wake the matching
//! session poll instead of waiting for its next tick.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use vigil_core::Envelope;
use vigil_core::event_types::{SCAN_COMPLETED, SCAN_FAILED, SCAN_PROGRESS, WILDCARD};
use vigil_realtime::{EventBus, EventStream, SubscribeOptions};
use vigil_tracker::ScanTracker;

/// Event types that trigger an immediate poll.
pub const SHORTCUT_EVENTS: [&str; 3] = [SCAN_PROGRESS, SCAN_COMPLETED, SCAN_FAILED];

fn shortcut_session(envelope: &Envelope) -> Option<&str> {
    if !SHORTCUT_EVENTS.contains(&envelope.event_type.as_str()) {
        return None;
    }
    envelope.payload_str("session_id").filter(|id| !id.is_empty())
}

/// Forwards scan events from the bus to [`ScanTracker::poll_now`].
pub struct EventBridge {
    events: EventStream<String>,
    tracker: ScanTracker,
}

impl EventBridge {
    /// Subscribe to `bus`. Events are buffered from this point on.
    pub fn new(bus: &EventBus, tracker: ScanTracker) -> Self {
        let options = SubscribeOptions::new()
            .filter(|e| shortcut_session(e).is_some())
            .transform(|e| shortcut_session(e).unwrap_or_default().to_owned());
        Self {
            events: bus.stream(WILDCARD, options),
            tracker,
        }
    }

    /// Run until `cancel` fires or the bus goes away.
    #[tracing::instrument(skip_all, name = "scan_event_bridge")]
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let session_id = tokio::select! {
                () = cancel.cancelled() => break,
                next = self.events.next() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            if self.tracker.poll_now(&session_id) {
                debug!(session_id, "scan event shortcut, polling now");
            } else {
                trace!(session_id, "scan event for untracked session");
            }
        }
        info!("scan event bridge stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
