//! # vigil
//!
//! Application root for the Vigil core. [`DashboardContext`] owns one
//! [`RealtimeContext`] and one [`ScanTracker`], built from [`VigilSettings`],
//! and is passed explicitly to whatever consumes them.

#![deny(unsafe_code)]

pub mod bridge;
pub mod errors;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_realtime::{ConnectionManager, EventBus, MessageStore, RealtimeContext};
use vigil_settings::VigilSettings;
use vigil_tracker::{ReqwestStatusClient, ScanTracker, StatusClient};

pub use bridge::EventBridge;
pub use errors::{DashboardError, Result};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Real-time context, scan tracker and their background tasks.
pub struct DashboardContext {
    settings: VigilSettings,
    realtime: RealtimeContext,
    tracker: ScanTracker,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DashboardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardContext")
            .field("realtime", &self.realtime)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl DashboardContext {
    /// Build from settings. `token` authenticates both the socket and the
    /// status endpoints.
    pub fn new(settings: VigilSettings, token: Option<String>) -> Result<Self> {
        let client = ReqwestStatusClient::new(&settings.tracker.api_base_url, token.clone())?;
        Ok(Self::with_status_client(settings, token, Arc::new(client)))
    }

    /// Build from `~/.vigil/settings.json` and the environment.
    pub fn from_settings_file(token: Option<String>) -> Result<Self> {
        Self::new(vigil_settings::load_settings()?, token)
    }

    /// Build with a custom status client.
    pub fn with_status_client(
        settings: VigilSettings,
        token: Option<String>,
        client: Arc<dyn StatusClient>,
    ) -> Self {
        let realtime = RealtimeContext::new(&settings, token);
        let tracker = ScanTracker::new(&settings.tracker, client);
        Self {
            settings,
            realtime,
            tracker,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Effective settings.
    pub fn settings(&self) -> &VigilSettings {
        &self.settings
    }

    /// The real-time context.
    pub fn realtime(&self) -> &RealtimeContext {
        &self.realtime
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        self.realtime.bus()
    }

    /// The message store.
    pub fn store(&self) -> &MessageStore {
        self.realtime.store()
    }

    /// The connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        self.realtime.connection()
    }

    /// The scan tracker.
    pub fn tracker(&self) -> &ScanTracker {
        &self.tracker
    }

    /// Attach the scan event shortcut so pushed scan events wake the matching
    /// session poll.
    pub fn attach_bridge(&self) {
        let bridge = EventBridge::new(self.realtime.bus(), self.tracker.clone());
        let handle = bridge.spawn(self.cancel.child_token());
        self.tasks.lock().push(handle);
    }

    /// Initialize logging, start the store sweep and the event shortcut, then
    /// connect.
    ///
    /// A failed first connection is returned, while reconnection keeps running
    /// in the background.
    pub async fn start(&self) -> Result<()> {
        vigil_core::logging::init_subscriber(
            &self.settings.logging.level,
            self.settings.logging.json,
        );

        let sweeper = self.realtime.spawn_sweeper();
        self.tasks.lock().push(sweeper);
        self.attach_bridge();

        info!(
            ws_url = %self.settings.connection.ws_base_url,
            api_url = %self.settings.tracker.api_base_url,
            "starting dashboard context"
        );
        self.realtime.connect().await?;
        Ok(())
    }

    /// Stop tracking, disconnect and wait for background tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let stopped = self.tracker.stop_all();
        self.realtime.shutdown().await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out, some background tasks may still be running");
        }
        info!(stopped_sessions = stopped, "dashboard context shut down");
    }
}
