//! In-process publish/subscribe register keyed by event type.
//!
//! Each subscription runs `filter → transform → callback` synchronously on the
//! emitting task. The subscriber list is snapshotted before delivery, so a
//! callback may subscribe, unsubscribe or emit again without deadlocking and
//! without changing who receives the current event. A panicking subscriber is
//! logged and skipped; the rest still receive the event.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, trace};
use vigil_core::Envelope;
use vigil_core::event_types::WILDCARD;

type FilterFn = dyn Fn(&Envelope) -> bool + Send + Sync;
type TransformFn<T> = dyn Fn(&Envelope) -> T + Send + Sync;
type DeliverFn = dyn Fn(&Envelope) + Send + Sync;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Per-subscription `filter` and `transform`.
///
/// Without a filter every event of the subscribed type matches. Without a
/// transform the callback receives a clone of the [`Envelope`].
pub struct SubscribeOptions<T = Envelope> {
    filter: Option<Box<FilterFn>>,
    transform: Box<TransformFn<T>>,
}

impl SubscribeOptions<Envelope> {
    /// Match everything, deliver the envelope as-is.
    pub fn new() -> Self {
        Self {
            filter: None,
            transform: Box::new(Envelope::clone),
        }
    }
}

impl Default for SubscribeOptions<Envelope> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubscribeOptions<T> {
    /// Only deliver events for which `filter` returns `true`.
    #[must_use]
    pub fn filter(mut self, filter: impl Fn(&Envelope) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Project each matching event before it reaches the callback.
    pub fn transform<U>(
        self,
        transform: impl Fn(&Envelope) -> U + Send + Sync + 'static,
    ) -> SubscribeOptions<U> {
        SubscribeOptions {
            filter: self.filter,
            transform: Box::new(transform),
        }
    }

    fn into_deliver(self, callback: impl Fn(T) + Send + Sync + 'static) -> Box<DeliverFn>
    where
        T: 'static,
    {
        let Self { filter, transform } = self;
        Box::new(move |envelope: &Envelope| {
            if filter.as_ref().is_none_or(|f| f(envelope)) {
                callback(transform(envelope));
            }
        })
    }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

struct Subscription {
    id: u64,
    deliver: Box<DeliverFn>,
}

struct BusInner {
    subscriptions: Mutex<HashMap<String, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
}

impl BusInner {
    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut subs = self.subscriptions.lock();
        let Some(list) = subs.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = subs.remove(event_type);
        }
        removed
    }
}

/// Typed event bus. Cheap to clone; clones share one register.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Register `callback` for `event_type` (or [`WILDCARD`] for every event).
    ///
    /// The subscription lives until the returned handle is unsubscribed or
    /// dropped.
    pub fn subscribe<T: 'static>(
        &self,
        event_type: &str,
        options: SubscribeOptions<T>,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            deliver: options.into_deliver(callback),
        });
        self.inner
            .subscriptions
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push(subscription);
        trace!(event_type, subscription_id = id, "subscribed");
        SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            event_type: event_type.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Subscribe as an async stream instead of a callback.
    ///
    /// Dropping the stream unsubscribes.
    pub fn stream<T: Send + 'static>(
        &self,
        event_type: &str,
        options: SubscribeOptions<T>,
    ) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(event_type, options, move |item| {
            let _ = tx.send(item);
        });
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
            _handle: handle,
        }
    }

    /// Deliver `envelope` to every subscriber of `event_type` and of [`WILDCARD`].
    ///
    /// Subscribers run in subscription order. Returns how many subscribers
    /// were invoked (filtered-out ones included, panicked ones excluded).
    pub fn emit(&self, event_type: &str, envelope: &Envelope) -> usize {
        let _ = self.inner.emitted.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.snapshot(event_type);
        let mut delivered = 0;
        for sub in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| (sub.deliver)(envelope))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    error!(
                        event_type,
                        subscription_id = sub.id,
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked, continuing with remaining subscribers"
                    );
                }
            }
        }
        debug!(event_type, subscribers = snapshot.len(), delivered, "event emitted");
        delivered
    }

    /// Subscriptions registered under exactly `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .lock()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Event types with at least one subscription, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.subscriptions.lock().keys().cloned().collect();
        types.sort();
        types
    }

    /// Total `emit` calls on this bus.
    pub fn emit_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    fn snapshot(&self, event_type: &str) -> Vec<Arc<Subscription>> {
        let subs = self.inner.subscriptions.lock();
        let mut snapshot: Vec<Arc<Subscription>> =
            subs.get(event_type).into_iter().flatten().cloned().collect();
        if event_type != WILDCARD {
            if let Some(wildcard) = subs.get(WILDCARD) {
                snapshot.extend(wildcard.iter().cloned());
                // Both lists are already id-ordered; merge them by id.
                snapshot.sort_by_key(|s| s.id);
            }
        }
        snapshot
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.event_types())
            .field("emit_count", &self.emit_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ─── Handles ─────────────────────────────────────────────────────────────────

/// Owner of one bus subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    bus: Weak<BusInner>,
    event_type: String,
    id: u64,
    active: AtomicBool,
}

impl SubscriptionHandle {
    /// Remove the subscription. Safe to call repeatedly and after the bus is gone.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(&self.event_type, self.id) {
                trace!(event_type = %self.event_type, subscription_id = self.id, "unsubscribed");
            }
        }
    }

    /// Whether `unsubscribe` has not run yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The event type this handle was registered under.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Bus subscription exposed as a [`Stream`]. Dropping it unsubscribes.
pub struct EventStream<T> {
    inner: UnboundedReceiverStream<T>,
    _handle: SubscriptionHandle,
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |item| sink.lock().push(item))
    }

    fn envelope(event_type: &str, payload: serde_json::Value) -> Envelope {
        Envelope::new(event_type, payload)
    }

    #[test]
    fn delivers_to_matching_type_only() {
        let bus = EventBus::new();
        let (seen, cb) = recorder::<Envelope>();
        let _h = bus.subscribe("scan_progress", SubscribeOptions::new(), cb);

        let _ = bus.emit("scan_progress", &envelope("scan_progress", json!({"p": 1})));
        let _ = bus.emit("notification", &envelope("notification", json!({})));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload["p"], 1);
    }

    #[test]
    fn wildcard_receives_every_type_once() {
        let bus = EventBus::new();
        let (seen, cb) = recorder::<Envelope>();
        let _h = bus.subscribe(WILDCARD, SubscribeOptions::new(), cb);

        let _ = bus.emit("a", &envelope("a", json!({})));
        let _ = bus.emit("b", &envelope("b", json!({})));

        let types: Vec<String> = seen.lock().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[test]
    fn filter_then_transform_then_callback() {
        let bus = EventBus::new();
        let (seen, cb) = recorder::<i64>();
        let options = SubscribeOptions::new()
            .filter(|e| e.payload["keep"] == true)
            .transform(|e| e.payload["n"].as_i64().unwrap_or_default() * 10);
        let _h = bus.subscribe("t", options, cb);

        let _ = bus.emit("t", &envelope("t", json!({"keep": true, "n": 2})));
        let _ = bus.emit("t", &envelope("t", json!({"keep": false, "n": 3})));

        assert_eq!(*seen.lock(), vec![20]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _a = bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| panic!("boom"));
        let (seen, cb) = recorder::<String>();
        let options = SubscribeOptions::new().transform(|e| e.payload["name"].to_string());
        let _b = bus.subscribe("t", options, cb);

        let delivered = bus.emit("t", &envelope("t", json!({"name": "node-1"})));

        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock(), vec!["\"node-1\"".to_string()]);
    }

    #[test]
    fn panicking_subscriber_is_logged() {
        let (logs, _guard) = vigil_core::logging::capture_logs();
        let bus = EventBus::new();
        let _a = bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| panic!("boom"));

        let _ = bus.emit("t", &envelope("t", json!({})));

        assert!(logs.has_event(tracing::Level::ERROR, "subscriber panicked"));
    }

    #[test]
    fn subscribers_run_in_subscription_order_across_wildcard() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (label, ty) in [("t1", "t"), ("w1", WILDCARD), ("t2", "t"), ("w2", WILDCARD)] {
            let order = Arc::clone(&order);
            handles.push(bus.subscribe(ty, SubscribeOptions::new(), move |_e: Envelope| {
                order.lock().push(label);
            }));
        }

        let _ = bus.emit("t", &envelope("t", json!({})));

        assert_eq!(*order.lock(), vec!["t1", "w1", "t2", "w2"]);
    }

    #[test]
    fn unsubscribe_during_emit_does_not_affect_current_pass() {
        let bus = EventBus::new();
        let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&victim);
        let _first = bus.subscribe("t", SubscribeOptions::new(), move |_e: Envelope| {
            if let Some(h) = slot.lock().as_ref() {
                h.unsubscribe();
            }
        });
        let (seen, cb) = recorder::<Envelope>();
        *victim.lock() = Some(bus.subscribe("t", SubscribeOptions::new(), cb));

        let _ = bus.emit("t", &envelope("t", json!({})));
        assert_eq!(seen.lock().len(), 1, "snapshot still delivers this pass");

        let _ = bus.emit("t", &envelope("t", json!({})));
        assert_eq!(seen.lock().len(), 1, "gone on the next pass");
    }

    #[test]
    fn unsubscribe_is_idempotent_and_prunes_type() {
        let bus = EventBus::new();
        let handle = bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| {});
        assert_eq!(bus.subscriber_count("t"), 1);

        handle.unsubscribe();
        handle.unsubscribe();

        assert!(!handle.is_active());
        assert_eq!(bus.subscriber_count("t"), 0);
        assert!(bus.event_types().is_empty());
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = EventBus::new();
        {
            let _h = bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| {});
            assert_eq!(bus.subscriber_count("t"), 1);
        }
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_safe() {
        let bus = EventBus::new();
        let handle = bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| {});
        drop(bus);
        handle.unsubscribe();
        assert!(!handle.is_active());
    }

    #[test]
    fn subscribe_from_callback_does_not_deadlock() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&spawned);
        let _h = bus.subscribe("t", SubscribeOptions::new(), move |_e: Envelope| {
            keep.lock()
                .push(inner_bus.subscribe("t", SubscribeOptions::new(), |_e: Envelope| {}));
        });

        assert_eq!(bus.emit("t", &envelope("t", json!({}))), 1);
        assert_eq!(bus.subscriber_count("t"), 2);
    }

    #[test]
    fn introspection_counts() {
        let bus = EventBus::new();
        let _a = bus.subscribe("b", SubscribeOptions::new(), |_e: Envelope| {});
        let _b = bus.subscribe("a", SubscribeOptions::new(), |_e: Envelope| {});
        let _ = bus.emit("a", &envelope("a", json!({})));
        let _ = bus.emit("zzz", &envelope("zzz", json!({})));

        assert_eq!(bus.event_types(), vec!["a", "b"]);
        assert_eq!(bus.emit_count(), 2);
    }

    #[tokio::test]
    async fn stream_yields_transformed_items() {
        let bus = EventBus::new();
        let mut stream = bus.stream(
            "t",
            SubscribeOptions::new().transform(|e| e.payload["n"].as_i64().unwrap_or_default()),
        );

        let _ = bus.emit("t", &envelope("t", json!({"n": 1})));
        let _ = bus.emit("t", &envelope("t", json!({"n": 2})));

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
    }

    #[test]
    fn dropping_stream_unsubscribes() {
        let bus = EventBus::new();
        let stream = bus.stream("t", SubscribeOptions::new());
        assert_eq!(bus.subscriber_count("t"), 1);
        drop(stream);
        assert_eq!(bus.subscriber_count("t"), 0);
    }
}
