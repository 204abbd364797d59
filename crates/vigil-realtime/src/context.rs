//! Explicitly constructed owner of the connection, bus and store.
//!
//! Inbound envelopes flow `ConnectionManager → MessageStore::add_message →
//! EventBus`, and every connection state change is mirrored into the store's
//! [`ConnectionStatus`]. Several contexts can coexist, each with its own socket.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vigil_core::{Clock, SystemClock};
use vigil_settings::VigilSettings;

use crate::bus::EventBus;
use crate::connection::{
    ConnectionError, ConnectionHandlers, ConnectionManager, ConnectionStatus, Result,
};
use crate::store::MessageStore;

/// Connection manager, event bus and message store, wired together.
#[derive(Clone, Debug)]
pub struct RealtimeContext {
    bus: EventBus,
    store: MessageStore,
    connection: ConnectionManager,
    cancel: CancellationToken,
}

impl RealtimeContext {
    /// Build a context on the system clock.
    pub fn new(settings: &VigilSettings, token: Option<String>) -> Self {
        Self::with_clock(settings, token, Arc::new(SystemClock))
    }

    /// Build a context whose store reads time from `clock`.
    pub fn with_clock(
        settings: &VigilSettings,
        token: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = EventBus::new();
        let store = MessageStore::with_clock(bus.clone(), &settings.store, clock);
        let connection = ConnectionManager::new(settings.connection.clone(), token);
        Self {
            bus,
            store,
            connection,
            cancel: CancellationToken::new(),
        }
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Handlers that feed the store. `on_error` is forwarded to `extra_on_error`.
    fn handlers(
        &self,
        extra_on_error: Option<Arc<dyn Fn(&ConnectionError) + Send + Sync>>,
    ) -> ConnectionHandlers {
        let inbound = self.store.clone();
        let status = self.store.clone();
        ConnectionHandlers::new()
            .on_message(move |envelope| {
                let _ = inbound.add_message(envelope);
            })
            .on_state_change(move |s: &ConnectionStatus| status.set_connection_status(s.clone()))
            .on_error(move |e| {
                if let Some(f) = &extra_on_error {
                    f(e);
                }
            })
    }

    /// Connect with store wiring. See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect(self.handlers(None)).await
    }

    /// Connect with store wiring plus an extra error observer.
    pub async fn connect_with_error_handler(
        &self,
        on_error: impl Fn(&ConnectionError) + Send + Sync + 'static,
    ) -> Result<()> {
        self.connection
            .connect(self.handlers(Some(Arc::new(on_error))))
            .await
    }

    /// Start the periodic store sweep. Stops on [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.store.spawn_sweeper(self.cancel.child_token())
    }

    /// Disconnect and stop background tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.disconnect().await;
        info!("realtime context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SubscribeOptions;
    use crate::connection::ConnectionState;
    use serde_json::json;
    use vigil_core::Envelope;

    #[test]
    fn contexts_are_independent() {
        let settings = VigilSettings::default();
        let a = RealtimeContext::new(&settings, None);
        let b = RealtimeContext::new(&settings, None);

        let _ = a.store().add_message(Envelope::new("x", json!({})));

        assert_eq!(a.store().len(), 1);
        assert!(b.store().is_empty());
    }

    #[test]
    fn store_feeds_bus() {
        let ctx = RealtimeContext::new(&VigilSettings::default(), None);
        let hits = Arc::new(parking_lot::Mutex::new(0));
        let h = Arc::clone(&hits);
        let _sub = ctx
            .bus()
            .subscribe("x", SubscribeOptions::new(), move |_e: Envelope| *h.lock() += 1);

        let _ = ctx.store().add_message(Envelope::new("x", json!({})));

        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_sweeper_and_closes() {
        let ctx = RealtimeContext::new(&VigilSettings::default(), None);
        let sweeper = ctx.spawn_sweeper();

        ctx.shutdown().await;
        sweeper.await.unwrap();

        assert_eq!(ctx.connection().state(), ConnectionState::Closed);
    }
}
