//! Scan session supervision.
//!
//! Each tracked session owns one [`CancellationToken`]; per-task poll loops run
//! on child tokens, so stopping a session is a single `cancel()`. The job map is
//! keyed by the registered session id and every removal goes through it, which
//! makes termination exactly-once: whichever caller removes the entry (an
//! explicit stop, a terminal status, a fatal error) is the one that stopped it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vigil_core::{SessionId, TaskId};
use vigil_settings::TrackerSettings;

use crate::client::StatusClient;
use crate::errors::{FetchError, Result, TrackerError};
use crate::session::JobDescriptor;
use crate::status::{JobStatus, PollResponse, RunState, task_status_label};

/// Callback receiving a reconciled status.
pub type StatusCallback = Arc<dyn Fn(&JobStatus) + Send + Sync>;

struct TrackedJob {
    generation: u64,
    cancel: CancellationToken,
    tasks: HashMap<TaskId, CancellationToken>,
    poke: Arc<Notify>,
}

struct TrackerInner {
    client: Arc<dyn StatusClient>,
    poll_interval: Duration,
    task_poll_interval: Duration,
    jobs: Mutex<HashMap<SessionId, TrackedJob>>,
    next_generation: AtomicU64,
}

impl TrackerInner {
    /// Remove the job if it is still the instance started as `generation`.
    fn finish(&self, session_id: &SessionId, generation: u64) -> bool {
        let removed = {
            let mut jobs = self.jobs.lock();
            match jobs.get(session_id) {
                Some(job) if job.generation == generation => jobs.remove(session_id),
                _ => None,
            }
        };
        match removed {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn forget_task(&self, session_id: &SessionId, generation: u64, task_id: &TaskId) {
        let token = self
            .jobs
            .lock()
            .get_mut(session_id)
            .filter(|job| job.generation == generation)
            .and_then(|job| job.tasks.remove(task_id));
        if let Some(token) = token {
            token.cancel();
        }
    }
}

/// Polls scan sessions until they reach a terminal state.
///
/// Cheap to clone; clones share the same set of tracked jobs.
#[derive(Clone)]
pub struct ScanTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for ScanTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanTracker")
            .field("poll_interval", &self.inner.poll_interval)
            .field("tracked", &self.inner.jobs.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScanTracker {
    /// Build a tracker polling through `client`.
    pub fn new(settings: &TrackerSettings, client: Arc<dyn StatusClient>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                client,
                poll_interval: settings.poll_interval(),
                task_poll_interval: settings.task_poll_interval(),
                jobs: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start polling `descriptor`'s session, plus one observability poll per
    /// sub-task that has its own endpoint.
    ///
    /// `on_update` receives every reconciled status, including the terminal
    /// one. `on_complete` fires once when the session reaches a terminal state
    /// or hits a fatal HTTP error. An existing job under the same session id is
    /// replaced. Must be called inside a tokio runtime.
    pub fn start_tracking(
        &self,
        descriptor: JobDescriptor,
        on_update: impl Fn(&JobStatus) + Send + Sync + 'static,
        on_complete: impl Fn(&JobStatus) + Send + Sync + 'static,
    ) -> Result<()> {
        if descriptor.tracking_endpoint.trim().is_empty() {
            return Err(TrackerError::InvalidUrl {
                url: descriptor.tracking_endpoint,
                reason: "empty tracking endpoint".into(),
            });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let session_id = descriptor.session_id.clone();
        let cancel = CancellationToken::new();
        let poke = Arc::new(Notify::new());

        let mut tasks = HashMap::new();
        let mut task_polls = Vec::new();
        for (task_id, endpoint) in descriptor.pollable_tasks() {
            if tasks.contains_key(task_id) {
                continue;
            }
            let token = cancel.child_token();
            let _ = tasks.insert(task_id.clone(), token.clone());
            task_polls.push((task_id.clone(), endpoint.to_owned(), token));
        }
        let task_count = tasks.len();

        let previous = self.inner.jobs.lock().insert(
            session_id.clone(),
            TrackedJob {
                generation,
                cancel: cancel.clone(),
                tasks,
                poke: Arc::clone(&poke),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            info!(session_id = %session_id, "replaced existing tracked session");
        }

        info!(
            session_id = %session_id,
            endpoint = %descriptor.tracking_endpoint,
            sub_tasks = descriptor.sub_tasks.len(),
            task_polls = task_count,
            "tracking started"
        );

        for (task_id, endpoint, token) in task_polls {
            let _ = tokio::spawn(run_task(
                Arc::clone(&self.inner),
                session_id.clone(),
                generation,
                task_id,
                endpoint,
                token,
            ));
        }
        let declared_tasks = descriptor.scan_count();
        let _ = tokio::spawn(run_session(SessionLoop {
            inner: Arc::clone(&self.inner),
            session_id,
            generation,
            endpoint: descriptor.tracking_endpoint,
            declared_tasks,
            cancel,
            poke,
            on_update: Arc::new(on_update),
            on_complete: Arc::new(on_complete),
        }));
        Ok(())
    }

    /// Stop polling a session and all of its task polls. Returns whether
    /// anything was being tracked.
    pub fn stop_tracking(&self, session_id: &str) -> bool {
        let removed = self.inner.jobs.lock().remove(session_id);
        match removed {
            Some(job) => {
                job.cancel.cancel();
                info!(session_id, "tracking stopped");
                true
            }
            None => false,
        }
    }

    /// Stop one task's poll, leaving the session poll running.
    pub fn stop_task_tracking(&self, session_id: &str, task_id: &str) -> bool {
        let token = self
            .inner
            .jobs
            .lock()
            .get_mut(session_id)
            .and_then(|job| job.tasks.remove(task_id));
        match token {
            Some(token) => {
                token.cancel();
                debug!(session_id, task_id, "task tracking stopped");
                true
            }
            None => false,
        }
    }

    /// Stop everything. Returns the number of sessions stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(SessionId, TrackedJob)> = self.inner.jobs.lock().drain().collect();
        for (_, job) in &drained {
            job.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(sessions = drained.len(), "all tracking stopped");
        }
        drained.len()
    }

    /// Whether `session_id` is being polled.
    pub fn is_tracking(&self, session_id: &str) -> bool {
        self.inner.jobs.lock().contains_key(session_id)
    }

    /// Tracked session ids, sorted.
    pub fn tracked_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.jobs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Task ids with a live poll under `session_id`, sorted.
    pub fn tracked_tasks(&self, session_id: &str) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .inner
            .jobs
            .lock()
            .get(session_id)
            .map(|job| job.tasks.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Poll `session_id` now instead of at its next tick. Returns whether the
    /// session is tracked.
    pub fn poll_now(&self, session_id: &str) -> bool {
        let poke = self
            .inner
            .jobs
            .lock()
            .get(session_id)
            .map(|job| Arc::clone(&job.poke));
        match poke {
            Some(poke) => {
                poke.notify_one();
                debug!(session_id, "immediate poll requested");
                true
            }
            None => false,
        }
    }
}

// ─── Poll loops ──────────────────────────────────────────────────────────────

struct SessionLoop {
    inner: Arc<TrackerInner>,
    session_id: SessionId,
    generation: u64,
    endpoint: String,
    declared_tasks: usize,
    cancel: CancellationToken,
    poke: Arc<Notify>,
    on_update: StatusCallback,
    on_complete: StatusCallback,
}

impl SessionLoop {
    fn complete(&self, status: &JobStatus) {
        if self.inner.finish(&self.session_id, self.generation) {
            info!(
                session_id = %self.session_id,
                status = %status.status,
                completed = status.completed_scans,
                failed = status.failed_scans,
                total = status.total_scans,
                "session reached terminal state"
            );
            invoke(&self.on_complete, status, &self.session_id, "on_complete");
        }
    }
}

#[instrument(skip_all, name = "session_poll", fields(session_id = %job.session_id))]
async fn run_session(job: SessionLoop) {
    let mut ticker = tokio::time::interval(job.inner.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let poked = tokio::select! {
            () = job.cancel.cancelled() => break,
            _ = ticker.tick() => false,
            () = job.poke.notified() => true,
        };
        if poked {
            ticker.reset();
        }

        let fetched = tokio::select! {
            () = job.cancel.cancelled() => break,
            r = job.inner.client.fetch(&job.endpoint) => r,
        };
        if job.cancel.is_cancelled() {
            break;
        }

        match fetched {
            Ok(body) => match PollResponse::parse(body) {
                Ok(response) => {
                    if let Some(echoed) = response
                        .echoed_id()
                        .filter(|id| *id != job.session_id.as_str())
                    {
                        warn!(echoed_id = echoed, "response id differs from tracked session");
                    }
                    let status = response.reconcile(&job.session_id);
                    debug!(
                        status = %status.status,
                        completed = status.completed_scans,
                        failed = status.failed_scans,
                        running = status.running_scans,
                        "session polled"
                    );
                    invoke(&job.on_update, &status, &job.session_id, "on_update");
                    if status.is_terminal() {
                        job.complete(&status);
                        break;
                    }
                }
                Err(e) if e.is_fatal() => {
                    let violation = TrackerError::ProtocolViolation {
                        session_id: job.session_id.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %violation, "stopping session");
                    let _ = job.inner.finish(&job.session_id, job.generation);
                    break;
                }
                Err(e) => warn!(error = %e, "ignoring malformed poll response"),
            },
            Err(e) if e.is_fatal() => {
                error!(error = %e, "fatal poll error, marking session failed");
                let status =
                    JobStatus::synthesized_failure(job.session_id.clone(), job.declared_tasks);
                job.complete(&status);
                break;
            }
            Err(e) => log_transient(&e),
        }
    }
    debug!("session poll loop exited");
}

#[instrument(skip_all, name = "task_poll", fields(session_id = %session_id, task_id = %task_id))]
async fn run_task(
    inner: Arc<TrackerInner>,
    session_id: SessionId,
    generation: u64,
    task_id: TaskId,
    endpoint: String,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(inner.task_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            () = cancel.cancelled() => break,
            r = inner.client.fetch(&endpoint) => r,
        };

        match fetched {
            Ok(body) => {
                let label = task_status_label(&body).unwrap_or("unknown");
                let state = RunState::from_label(label);
                info!(status = label, "task polled");
                if state.is_terminal() {
                    inner.forget_task(&session_id, generation, &task_id);
                    break;
                }
            }
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "task poll failed, stopping task poll");
                inner.forget_task(&session_id, generation, &task_id);
                break;
            }
            Err(e) => log_transient(&e),
        }
    }
}

fn log_transient(e: &FetchError) {
    match e {
        FetchError::Decode { .. } => warn!(error = %e, "undecodable poll response, polling continues"),
        _ => debug!(error = %e, "poll request failed, polling continues"),
    }
}

fn invoke(callback: &StatusCallback, status: &JobStatus, session_id: &SessionId, which: &str) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(status))) {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(session_id = %session_id, callback = which, panic = message, "tracker callback panicked");
    }
}
