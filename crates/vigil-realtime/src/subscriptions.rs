//! Typed, entity-scoped wrappers over bus subscriptions.
//!
//! A [`ScopedSubscription`] listens to a set of event types, optionally keeps
//! only events whose payload entity id (see [`Envelope::entity_id`]) equals a
//! given id, and projects each match to a [`ProjectedEvent`]. Changing the
//! scope drops every old subscription before registering the new ones.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use vigil_core::Envelope;
use vigil_core::event_types::{DISCOVERY_EVENTS, NOTIFICATION, SCAN_EVENTS};

use crate::bus::{EventBus, SubscribeOptions, SubscriptionHandle};

/// What a scoped subscriber receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectedEvent {
    /// Event discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific data.
    pub payload: Value,
    /// Server timestamp, if sent.
    pub timestamp: Option<String>,
}

impl ProjectedEvent {
    /// Decode the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

impl From<&Envelope> for ProjectedEvent {
    fn from(envelope: &Envelope) -> Self {
        Self {
            event_type: envelope.event_type.clone(),
            payload: envelope.payload.clone(),
            timestamp: envelope.timestamp.clone(),
        }
    }
}

// ─── Typed payloads ──────────────────────────────────────────────────────────

/// Payload of `discovery_*` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryProgress {
    /// Node being discovered.
    pub node_id: Option<String>,
    /// Completion percentage, 0–100.
    pub progress: Option<f64>,
    /// Server-side status label.
    pub status: Option<String>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Anything else the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `scan_*` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanProgress {
    /// Owning scan session.
    pub session_id: Option<String>,
    /// The individual scan.
    pub scan_id: Option<String>,
    /// Node being scanned.
    pub node_id: Option<String>,
    /// Scan type, e.g. `port` or `vulnerability`.
    pub scan_type: Option<String>,
    /// Completion percentage, 0–100.
    pub progress: Option<f64>,
    /// Server-side status label.
    pub status: Option<String>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Anything else the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `notification` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    /// Short heading.
    pub title: Option<String>,
    /// Body text.
    pub message: Option<String>,
    /// `info`, `warning`, `error`, ...
    pub severity: Option<String>,
    /// Anything else the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ─── ScopedSubscription ──────────────────────────────────────────────────────

type ProjectedFn = dyn Fn(&ProjectedEvent) + Send + Sync;

struct Scope {
    entity_id: Option<String>,
    event_types: Vec<String>,
    handles: Vec<SubscriptionHandle>,
}

/// A set of bus subscriptions sharing one entity filter and one callback.
///
/// Dropping it unsubscribes everything.
pub struct ScopedSubscription {
    bus: EventBus,
    scope: Mutex<Scope>,
    latest: Arc<Mutex<Option<ProjectedEvent>>>,
    callback: Arc<ProjectedFn>,
}

impl ScopedSubscription {
    /// Subscribe to `event_types`, keeping only events about `entity_id` when
    /// one is given.
    ///
    /// `Some("")` registers nothing until a non-empty id is set.
    pub fn new(
        bus: &EventBus,
        entity_id: Option<&str>,
        event_types: &[&str],
        callback: impl Fn(&ProjectedEvent) + Send + Sync + 'static,
    ) -> Self {
        let this = Self {
            bus: bus.clone(),
            scope: Mutex::new(Scope {
                entity_id: None,
                event_types: Vec::new(),
                handles: Vec::new(),
            }),
            latest: Arc::new(Mutex::new(None)),
            callback: Arc::new(callback),
        };
        this.set_scope(entity_id, event_types);
        this
    }

    /// Replace the entity id and event types.
    ///
    /// Old subscriptions are removed before new ones are registered, under one
    /// lock, so no event is delivered under a mix of old and new scope.
    pub fn set_scope(&self, entity_id: Option<&str>, event_types: &[&str]) {
        let mut scope = self.scope.lock();
        for handle in scope.handles.drain(..) {
            handle.unsubscribe();
        }
        scope.entity_id = entity_id.map(str::to_string);
        scope.event_types = event_types.iter().map(ToString::to_string).collect();

        if entity_id.is_some_and(str::is_empty) {
            debug!(?event_types, "empty entity id, subscription idle");
            return;
        }

        let handles: Vec<SubscriptionHandle> = event_types
            .iter()
            .map(|event_type| self.subscribe_one(event_type, entity_id))
            .collect();
        scope.handles = handles;
        debug!(entity_id, ?event_types, "scoped subscription registered");
    }

    /// Change only the entity id.
    pub fn set_entity(&self, entity_id: Option<&str>) {
        let types = self.scope.lock().event_types.clone();
        let types: Vec<&str> = types.iter().map(String::as_str).collect();
        self.set_scope(entity_id, &types);
    }

    /// Drop every subscription. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        for handle in self.scope.lock().handles.drain(..) {
            handle.unsubscribe();
        }
    }

    /// The most recently delivered event.
    pub fn latest(&self) -> Option<ProjectedEvent> {
        self.latest.lock().clone()
    }

    /// Current entity filter.
    pub fn entity_id(&self) -> Option<String> {
        self.scope.lock().entity_id.clone()
    }

    /// Current event types.
    pub fn event_types(&self) -> Vec<String> {
        self.scope.lock().event_types.clone()
    }

    /// Number of live bus subscriptions.
    pub fn active_count(&self) -> usize {
        self.scope
            .lock()
            .handles
            .iter()
            .filter(|h| h.is_active())
            .count()
    }

    fn subscribe_one(&self, event_type: &str, entity_id: Option<&str>) -> SubscriptionHandle {
        let wanted = entity_id.map(str::to_string);
        let options = SubscribeOptions::new()
            .filter(move |envelope| match &wanted {
                Some(id) => envelope.entity_id() == Some(id.as_str()),
                None => true,
            })
            .transform(|envelope: &Envelope| ProjectedEvent::from(envelope));
        let latest = Arc::clone(&self.latest);
        let callback = Arc::clone(&self.callback);
        self.bus.subscribe(event_type, options, move |event: ProjectedEvent| {
            *latest.lock() = Some(event.clone());
            callback(&event);
        })
    }
}

impl std::fmt::Debug for ScopedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSubscription")
            .field("entity_id", &self.entity_id())
            .field("event_types", &self.event_types())
            .finish_non_exhaustive()
    }
}

/// `discovery_progress`, `discovery_success` and `discovery_failed` for one node.
pub fn node_discovery_subscription(
    bus: &EventBus,
    node_id: &str,
    callback: impl Fn(&ProjectedEvent) + Send + Sync + 'static,
) -> ScopedSubscription {
    ScopedSubscription::new(bus, Some(node_id), &DISCOVERY_EVENTS, callback)
}

/// `scan_started`, `scan_progress`, `scan_completed` and `scan_failed` for one node.
pub fn node_scan_subscription(
    bus: &EventBus,
    node_id: &str,
    callback: impl Fn(&ProjectedEvent) + Send + Sync + 'static,
) -> ScopedSubscription {
    ScopedSubscription::new(bus, Some(node_id), &SCAN_EVENTS, callback)
}

/// Every `notification`, unscoped.
pub fn notification_subscription(
    bus: &EventBus,
    callback: impl Fn(&ProjectedEvent) + Send + Sync + 'static,
) -> ScopedSubscription {
    ScopedSubscription::new(bus, None, &[NOTIFICATION], callback)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::event_types::{
        DISCOVERY_PROGRESS, SCAN_COMPLETED, SCAN_PROGRESS, SCAN_STARTED,
    };

    fn collector() -> (
        Arc<Mutex<Vec<ProjectedEvent>>>,
        impl Fn(&ProjectedEvent) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: &ProjectedEvent| sink.lock().push(e.clone()))
    }

    fn emit(bus: &EventBus, event_type: &str, payload: Value) {
        let envelope = Envelope::new(event_type, payload).with_timestamp("2026-01-01T00:00:00Z");
        let _ = bus.emit(event_type, &envelope);
    }

    #[test]
    fn discovery_ignores_other_nodes_for_all_types() {
        let bus = EventBus::new();
        let (seen, cb) = collector();
        let _sub = node_discovery_subscription(&bus, "node-1", cb);

        for event_type in DISCOVERY_EVENTS {
            emit(&bus, event_type, json!({"node_id": "node-2"}));
            emit(&bus, event_type, json!({"node_uuid": "node-2"}));
            emit(&bus, event_type, json!({"uuid": "node-2"}));
        }
        assert!(seen.lock().is_empty());

        for event_type in DISCOVERY_EVENTS {
            emit(&bus, event_type, json!({"node_id": "node-1"}));
        }
        let types: Vec<String> = seen.lock().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(types, DISCOVERY_EVENTS.map(String::from).to_vec());
    }

    #[test]
    fn projection_keeps_type_payload_timestamp() {
        let bus = EventBus::new();
        let (seen, cb) = collector();
        let _sub = node_scan_subscription(&bus, "n1", cb);

        emit(&bus, SCAN_PROGRESS, json!({"node_id": "n1", "progress": 40.0}));

        let seen = seen.lock();
        assert_eq!(seen[0].event_type, SCAN_PROGRESS);
        assert_eq!(seen[0].payload["progress"], 40.0);
        assert_eq!(seen[0].timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn latest_tracks_last_delivery() {
        let bus = EventBus::new();
        let sub = node_scan_subscription(&bus, "n1", |_e| {});
        assert!(sub.latest().is_none());

        emit(&bus, SCAN_STARTED, json!({"node_id": "n1"}));
        emit(&bus, SCAN_COMPLETED, json!({"node_id": "n1"}));
        emit(&bus, SCAN_PROGRESS, json!({"node_id": "other"}));

        assert_eq!(sub.latest().unwrap().event_type, SCAN_COMPLETED);
    }

    #[test]
    fn set_scope_swaps_without_leaking() {
        let bus = EventBus::new();
        let (seen, cb) = collector();
        let sub = node_scan_subscription(&bus, "n1", cb);
        assert_eq!(bus.subscriber_count(SCAN_PROGRESS), 1);

        sub.set_scope(Some("n2"), &[SCAN_PROGRESS]);

        assert_eq!(bus.subscriber_count(SCAN_PROGRESS), 1);
        assert_eq!(bus.subscriber_count(SCAN_STARTED), 0);
        emit(&bus, SCAN_PROGRESS, json!({"node_id": "n1"}));
        emit(&bus, SCAN_PROGRESS, json!({"node_id": "n2"}));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].payload["node_id"], "n2");
    }

    #[test]
    fn set_entity_keeps_types() {
        let bus = EventBus::new();
        let sub = node_discovery_subscription(&bus, "n1", |_e| {});
        sub.set_entity(Some("n9"));
        assert_eq!(sub.entity_id().as_deref(), Some("n9"));
        assert_eq!(sub.event_types().len(), 3);
        assert_eq!(sub.active_count(), 3);
    }

    #[test]
    fn empty_entity_is_idle() {
        let bus = EventBus::new();
        let (seen, cb) = collector();
        let sub = node_discovery_subscription(&bus, "", cb);
        emit(&bus, DISCOVERY_PROGRESS, json!({"node_id": ""}));
        assert_eq!(sub.active_count(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn drop_and_unsubscribe_release_bus_entries() {
        let bus = EventBus::new();
        let sub = node_scan_subscription(&bus, "n1", |_e| {});
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(bus.event_types().is_empty());

        {
            let _sub = notification_subscription(&bus, |_e| {});
            assert_eq!(bus.subscriber_count(NOTIFICATION), 1);
        }
        assert_eq!(bus.subscriber_count(NOTIFICATION), 0);
    }

    #[test]
    fn notification_is_unscoped() {
        let bus = EventBus::new();
        let (seen, cb) = collector();
        let _sub = notification_subscription(&bus, cb);
        emit(&bus, NOTIFICATION, json!({"title": "a"}));
        emit(&bus, NOTIFICATION, json!({"title": "b", "node_id": "n1"}));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn typed_payload_projection() {
        let event = ProjectedEvent {
            event_type: SCAN_PROGRESS.into(),
            payload: json!({
                "session_id": "s1",
                "node_id": "n1",
                "progress": 55.5,
                "eta_seconds": 12
            }),
            timestamp: None,
        };
        let scan: ScanProgress = event.payload_as().unwrap();
        assert_eq!(scan.session_id.as_deref(), Some("s1"));
        assert_eq!(scan.progress, Some(55.5));
        assert_eq!(scan.extra["eta_seconds"], 12);

        let note = ProjectedEvent {
            event_type: NOTIFICATION.into(),
            payload: json!({"title": "Scan done", "severity": "info"}),
            timestamp: None,
        };
        let note: Notification = note.payload_as().unwrap();
        assert_eq!(note.title.as_deref(), Some("Scan done"));
    }

    #[test]
    fn typed_payload_rejects_wrong_shape() {
        let event = ProjectedEvent {
            event_type: DISCOVERY_PROGRESS.into(),
            payload: json!({"progress": "half"}),
            timestamp: None,
        };
        assert!(event.payload_as::<DiscoveryProgress>().is_err());
    }
}
