//! The single duplex socket to the server, with heartbeat and reconnection.
//!
//! Lifecycle:
//! 1. [`ConnectionManager::connect`] opens the socket and resolves on the first
//!    successful open, or fails if that first attempt fails.
//! 2. While connected, a session task writes queued frames, sends a `ping`
//!    every heartbeat interval and hands decoded envelopes to `on_message`.
//! 3. An abnormal close moves to `Disconnected` and schedules a reconnect with
//!    jittered exponential backoff, forever, until [`ConnectionManager::disconnect`].
//! 4. A liveness check once per interval, and the host signals
//!    [`notify_foreground`](ConnectionManager::notify_foreground) and
//!    [`notify_network_online`](ConnectionManager::notify_network_online),
//!    reconnect early. Only one open attempt is ever in flight.

mod error;
mod session;
mod state;

pub use error::{ConnectionError, Result};
pub use state::{ConnectionState, ConnectionStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use vigil_core::Envelope;
use vigil_settings::ConnectionSettings;

use self::session::{SessionEnd, run_session};

// ─── Handlers ────────────────────────────────────────────────────────────────

type MessageFn = dyn Fn(Envelope) + Send + Sync;
type StatusFn = dyn Fn(&ConnectionStatus) + Send + Sync;
type ErrorFn = dyn Fn(&ConnectionError) + Send + Sync;

/// Callbacks the manager invokes. All are optional.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    on_message: Option<Arc<MessageFn>>,
    on_state_change: Option<Arc<StatusFn>>,
    on_error: Option<Arc<ErrorFn>>,
}

impl ConnectionHandlers {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every decoded inbound envelope.
    #[must_use]
    pub fn on_message(mut self, f: impl Fn(Envelope) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Receive a status snapshot on every state transition.
    #[must_use]
    pub fn on_state_change(
        mut self,
        f: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Receive transport errors absorbed by the reconnect loop.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

struct Inner {
    settings: ConnectionSettings,
    token: Option<String>,
    state_tx: watch::Sender<ConnectionState>,
    handlers: RwLock<ConnectionHandlers>,
    manual: AtomicBool,
    in_flight: AtomicBool,
    attempts: AtomicU32,
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    session: Mutex<Option<ActiveSession>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    liveness: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the socket. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing is opened until [`connect`](Self::connect).
    ///
    /// `token` is sent as the `token` query parameter when present.
    pub fn new(settings: ConnectionSettings, token: Option<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                token,
                state_tx,
                handlers: RwLock::new(ConnectionHandlers::default()),
                manual: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                last_error: Mutex::new(None),
                connected_at: Mutex::new(None),
                session: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                liveness: Mutex::new(None),
            }),
        }
    }

    /// Open the socket and keep it open.
    ///
    /// Resolves once the first attempt opens. If that attempt fails the error
    /// is returned, and reconnection continues in the background.
    pub async fn connect(&self, handlers: ConnectionHandlers) -> Result<()> {
        *self.inner.handlers.write() = handlers;
        self.inner.manual.store(false, Ordering::SeqCst);
        self.ensure_liveness_task();
        if self.is_connected() {
            return Ok(());
        }
        self.open().await?;
        if self.is_connected() {
            return Ok(());
        }
        // Another attempt owned the open; wait for its outcome.
        self.wait_for_open().await
    }

    /// Wait until the in-flight open settles.
    async fn wait_for_open(&self) -> Result<()> {
        let mut states = self.subscribe_state();
        loop {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(ConnectionError::Closed);
                }
                ConnectionState::Disconnected if !self.inner.in_flight.load(Ordering::SeqCst) => {
                    return Err(ConnectionError::Connect {
                        url: self.endpoint(),
                        reason: self
                            .last_error()
                            .unwrap_or_else(|| "connection attempt failed".to_owned()),
                    });
                }
                _ => {}
            }
            if states.changed().await.is_err() {
                return Err(ConnectionError::Closed);
            }
        }
    }

    /// Redacted socket URL, or the raw base when it does not parse.
    fn endpoint(&self) -> String {
        build_ws_url(&self.inner.settings.ws_base_url, None)
            .map_or_else(|_| self.inner.settings.ws_base_url.clone(), |u| redact(&u))
    }

    /// Close the socket without reconnecting.
    pub async fn disconnect(&self) {
        self.inner.manual.store(true, Ordering::SeqCst);
        abort_slot(&self.inner.reconnect_timer);
        abort_slot(&self.inner.liveness);
        self.set_state(ConnectionState::Closing);

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                warn!(error = %e, "session task did not finish cleanly");
            }
        }
        *self.inner.connected_at.lock() = None;
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Closed);
        info!("disconnected");
    }

    /// Queue an envelope for sending. Logs a warning and drops it when the
    /// socket is not open or the outbound queue is full.
    pub fn send(&self, envelope: &Envelope) {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(event_type = %envelope.event_type, error = %e, "failed to encode envelope");
                return;
            }
        };
        let outbound = self
            .inner
            .session
            .lock()
            .as_ref()
            .filter(|_| self.is_connected())
            .map(|s| s.outbound.clone());
        let Some(outbound) = outbound else {
            warn!(event_type = %envelope.event_type, "cannot send: not connected");
            return;
        };
        if let Err(e) = outbound.try_send(text) {
            warn!(event_type = %envelope.event_type, error = %e, "dropping outbound envelope");
        }
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Most recent transport error, cleared on a successful open.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Snapshot of state and bookkeeping.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            last_error: self.last_error(),
            reconnect_attempts: self.reconnect_attempts(),
            connected_at: *self.inner.connected_at.lock(),
        }
    }

    /// The host became visible again: reconnect now if not connected.
    pub fn notify_foreground(&self) {
        debug!("foreground signal");
        self.reconnect_now("foreground");
    }

    /// The host regained network connectivity: reconnect now if not connected.
    pub fn notify_network_online(&self) {
        debug!("network online signal");
        self.reconnect_now("network_online");
    }

    /// Re-evaluate connectivity. Returns `true` when a reconnect was forced.
    ///
    /// A `Connected` manager whose session task has already exited (the socket
    /// died without a close being observed) is torn down and reopened. A
    /// `Disconnected` manager with no timer pending is reopened.
    pub fn check_liveness(&self) -> bool {
        if self.inner.manual.load(Ordering::SeqCst) || self.inner.in_flight.load(Ordering::SeqCst)
        {
            return false;
        }
        match self.state() {
            ConnectionState::Connected => {
                let dead = self
                    .inner
                    .session
                    .lock()
                    .as_ref()
                    .is_none_or(|s| s.task.is_finished() || s.outbound.is_closed());
                if !dead {
                    return false;
                }
                warn!("socket died silently, forcing reconnect");
                if let Some(session) = self.inner.session.lock().take() {
                    session.cancel.cancel();
                }
                self.set_state(ConnectionState::Disconnected);
                self.reconnect_now("liveness");
                true
            }
            ConnectionState::Disconnected => {
                let timer_pending = self
                    .inner
                    .reconnect_timer
                    .lock()
                    .as_ref()
                    .is_some_and(|t| !t.is_finished());
                if timer_pending {
                    return false;
                }
                self.reconnect_now("liveness");
                true
            }
            _ => false,
        }
    }

    // ── internals ──────────────────────────────────────────────────────

    /// One open attempt. Boxed because the reconnect path re-enters it from
    /// spawned tasks.
    fn open(&self) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move {
            if this.inner.in_flight.swap(true, Ordering::SeqCst) {
                debug!("open skipped: attempt already in flight");
                return Ok(());
            }
            if this.is_connected() {
                this.inner.in_flight.store(false, Ordering::SeqCst);
                return Ok(());
            }
            let result = this.open_inner().await;
            this.inner.in_flight.store(false, Ordering::SeqCst);
            if result.is_err() && this.inner.manual.load(Ordering::SeqCst) {
                // disconnect() ran during the attempt; it owns the final state.
                this.set_state(ConnectionState::Closed);
                return Err(ConnectionError::Closed);
            }
            match &result {
                Ok(()) | Err(ConnectionError::Closed) => {}
                Err(e @ ConnectionError::InvalidUrl { .. }) => {
                    // Retrying cannot fix a bad base URL.
                    this.absorb_error(e);
                    this.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    this.absorb_error(e);
                    this.fall_back_to_reconnect();
                }
            }
            result
        }
        .boxed()
    }

    async fn open_inner(&self) -> Result<()> {
        let url = build_ws_url(&self.inner.settings.ws_base_url, self.inner.token.as_deref())?;
        let endpoint = redact(&url);
        if self.inner.manual.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.set_state(ConnectionState::Connecting);
        info!(url = %endpoint, attempt = self.reconnect_attempts(), "connecting");

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect {
                url: endpoint.clone(),
                reason: e.to_string(),
            })?;

        if self.inner.manual.load(Ordering::SeqCst) {
            // disconnect() ran while the handshake was in flight.
            drop(ws);
            return Err(ConnectionError::Closed);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.inner.settings.outbound_buffer.max(1));
        let cancel = CancellationToken::new();
        let heartbeat = self.inner.settings.heartbeat_interval();
        let handler = self.inner.handlers.read().on_message.clone();
        let this = self.clone();
        let session_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let end = run_session(ws, rx, heartbeat, session_cancel, generation, move |env| {
                if let Some(h) = &handler {
                    h(env);
                }
            })
            .await;
            this.session_ended(generation, &end);
        });

        let previous = self.inner.session.lock().replace(ActiveSession {
            generation,
            cancel,
            outbound: tx,
            task,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.inner.attempts.store(0, Ordering::SeqCst);
        *self.inner.last_error.lock() = None;
        *self.inner.connected_at.lock() = Some(Utc::now());
        self.set_state(ConnectionState::Connected);
        info!(url = %endpoint, generation, "connected");
        Ok(())
    }

    fn session_ended(&self, generation: u64, end: &SessionEnd) {
        if *end == SessionEnd::Cancelled {
            return;
        }
        {
            let mut session = self.inner.session.lock();
            if session.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            *session = None;
        }
        *self.inner.connected_at.lock() = None;
        self.absorb_error(&ConnectionError::Transport {
            reason: end.describe(),
        });
        self.fall_back_to_reconnect();
    }

    /// Move to `Disconnected` and arm the backoff timer, unless closed manually.
    fn fall_back_to_reconnect(&self) {
        if self.inner.manual.load(Ordering::SeqCst) {
            return;
        }
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect(attempt);
    }

    fn schedule_reconnect(&self, attempt: u32) {
        let delay = self.inner.settings.reconnect.delay_for(attempt);
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        info!(attempt, delay_ms, "reconnect scheduled");

        let this = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own slot so a failing open can schedule the next timer.
            drop(this.inner.reconnect_timer.lock().take());
            let _ = this.open().await;
        });
        if let Some(old) = self.inner.reconnect_timer.lock().replace(timer) {
            old.abort();
        }
    }

    fn reconnect_now(&self, reason: &'static str) {
        if self.inner.manual.load(Ordering::SeqCst) || self.is_connected() {
            return;
        }
        if self.inner.in_flight.load(Ordering::SeqCst) {
            debug!(reason, "reconnect skipped: attempt already in flight");
            return;
        }
        abort_slot(&self.inner.reconnect_timer);
        info!(reason, "reconnecting now");
        let this = self.clone();
        drop(tokio::spawn(async move {
            let _ = this.open().await;
        }));
    }

    fn ensure_liveness_task(&self) {
        let mut slot = self.inner.liveness.lock();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let this = self.clone();
        let period = self.inner.settings.liveness_check_interval();
        *slot = Some(tokio::spawn(async move { this.liveness_loop(period).await }));
    }

    #[tracing::instrument(skip_all, name = "ws_liveness")]
    async fn liveness_loop(self, period: std::time::Duration) {
        let mut ticker = tokio::time::interval(period);
        let _ = ticker.tick().await;
        loop {
            let _ = ticker.tick().await;
            if self.inner.manual.load(Ordering::SeqCst) {
                return;
            }
            let _ = self.check_liveness();
        }
    }

    fn absorb_error(&self, error: &ConnectionError) {
        warn!(error = %error, "connection error");
        *self.inner.last_error.lock() = Some(error.to_string());
        let handler = self.inner.handlers.read().on_error.clone();
        if let Some(h) = handler {
            h(error);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(next);
        if previous == next {
            return;
        }
        debug!(from = %previous, to = %next, "connection state changed");
        let handler = self.inner.handlers.read().on_state_change.clone();
        if let Some(h) = handler {
            h(&self.status());
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn abort_slot(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = slot.lock().take() {
        handle.abort();
    }
}

/// `<base>/ws`, with `token` as a query parameter when present.
pub fn build_ws_url(base: &str, token: Option<&str>) -> Result<Url> {
    let raw = format!("{}/ws", base.trim_end_matches('/'));
    let mut url = Url::parse(&raw).map_err(|e| ConnectionError::InvalidUrl {
        url: raw.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectionError::InvalidUrl {
            url: raw,
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if let Some(token) = token {
        let _ = url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// The URL without its query, for logs and errors.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
