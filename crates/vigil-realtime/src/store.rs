//! Time- and capacity-bounded buffer of received envelopes.
//!
//! Every accepted envelope is stamped with `received_at`/`expires_at`, buffered,
//! and re-emitted through the [`EventBus`] under its own type (wildcard
//! subscribers receive it through the bus's `*` fan-out). Expired entries are
//! purged on every insert and by a periodic sweep; capacity overflow evicts the
//! oldest entries first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vigil_core::{Clock, Envelope, StoredMessage, SystemClock};
use vigil_settings::StoreSettings;

use crate::bus::EventBus;
use crate::connection::ConnectionStatus;

/// Message store. Cheap to clone; clones share one buffer.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    messages: Mutex<VecDeque<StoredMessage>>,
    status: Mutex<ConnectionStatus>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    max_messages: usize,
    sweep_interval: Duration,
}

impl MessageStore {
    /// Store on the system clock.
    pub fn new(bus: EventBus, settings: &StoreSettings) -> Self {
        Self::with_clock(bus, settings, Arc::new(SystemClock))
    }

    /// Store on an injected clock.
    pub fn with_clock(bus: EventBus, settings: &StoreSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                messages: Mutex::new(VecDeque::with_capacity(settings.max_messages)),
                status: Mutex::new(ConnectionStatus::default()),
                bus,
                clock,
                ttl: settings.ttl(),
                max_messages: settings.max_messages.max(1),
                sweep_interval: settings.sweep_interval(),
            }),
        }
    }

    /// The bus this store republishes to.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Stamp, buffer and republish an envelope.
    ///
    /// Expiry and capacity are enforced before the message becomes visible to
    /// queries; the bus emission happens after the buffer lock is released.
    pub fn add_message(&self, envelope: Envelope) -> StoredMessage {
        let now = self.inner.clock.now();
        let stored = StoredMessage::stamp(envelope, now, self.inner.ttl);
        let evicted = {
            let mut messages = self.inner.messages.lock();
            messages.push_back(stored.clone());
            let expired = purge_expired(&mut messages, now);
            let overflow = messages.len().saturating_sub(self.inner.max_messages);
            messages.drain(..overflow).for_each(drop);
            expired + overflow
        };
        trace!(
            event_type = stored.event_type(),
            message_id = %stored.id,
            evicted,
            "message stored"
        );
        let _ = self
            .inner
            .bus
            .emit(stored.event_type(), &stored.envelope);
        stored
    }

    /// The most recent `limit` messages of `event_type`, in receipt order.
    pub fn get_messages_by_type(&self, event_type: &str, limit: usize) -> Vec<StoredMessage> {
        self.most_recent(limit, |m| m.event_type() == event_type)
    }

    /// The most recent `limit` messages about `entity_id`, optionally narrowed
    /// to one type, in receipt order.
    pub fn get_messages_for_node(
        &self,
        entity_id: &str,
        event_type: Option<&str>,
        limit: usize,
    ) -> Vec<StoredMessage> {
        self.most_recent(limit, |m| {
            m.envelope.entity_id() == Some(entity_id)
                && event_type.is_none_or(|t| m.event_type() == t)
        })
    }

    /// Most recent message of `event_type`, if any.
    pub fn latest(&self, event_type: &str) -> Option<StoredMessage> {
        self.inner
            .messages
            .lock()
            .iter()
            .rev()
            .find(|m| m.event_type() == event_type)
            .cloned()
    }

    /// Purge expired messages now. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.inner.clock.now();
        let removed = purge_expired(&mut self.inner.messages.lock(), now);
        if removed > 0 {
            debug!(removed, "expired messages purged");
        }
        removed
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.inner.messages.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.messages.lock().is_empty()
    }

    /// Drop every buffered message.
    pub fn clear(&self) {
        self.inner.messages.lock().clear();
    }

    /// Current connection bookkeeping.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.status.lock().clone()
    }

    /// Replace the connection bookkeeping. Not subject to TTL or eviction.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        *self.inner.status.lock() = status;
    }

    /// Run [`cleanup`](Self::cleanup) every sweep interval until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move { store.sweep_loop(cancel).await })
    }

    #[tracing::instrument(skip_all, name = "store_sweeper")]
    async fn sweep_loop(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.sweep_interval);
        // First tick completes immediately; the store starts empty.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.cleanup();
                }
                () = cancel.cancelled() => {
                    debug!("store sweeper stopped");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("len", &self.len())
            .field("max_messages", &self.inner.max_messages)
            .finish_non_exhaustive()
    }
}

impl MessageStore {
    fn most_recent(
        &self,
        limit: usize,
        matches: impl Fn(&StoredMessage) -> bool,
    ) -> Vec<StoredMessage> {
        let messages = self.inner.messages.lock();
        let mut picked: Vec<StoredMessage> = messages
            .iter()
            .rev()
            .filter(|m| matches(m))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }
}

/// Remove every expired message, wherever it sits. Returns the count removed.
fn purge_expired(messages: &mut VecDeque<StoredMessage>, now: chrono::DateTime<chrono::Utc>) -> usize {
    let before = messages.len();
    messages.retain(|m| !m.is_expired(now));
    before - messages.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
