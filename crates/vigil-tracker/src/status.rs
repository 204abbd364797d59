//! Poll response shapes and their reconciliation to one canonical status.
//!
//! A session endpoint answers either with a flat job record (one status, no
//! sub-task detail) or with an aggregated session record listing every
//! sub-task. Servers that send a `kind` discriminant (`"job"` / `"session"`)
//! are decoded as a tagged union; for the rest the key set decides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_core::SessionId;

use crate::errors::ResponseError;

// ─── Canonical status ────────────────────────────────────────────────────────

/// Canonical run state of a job or task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Anything that is not terminal.
    #[default]
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with failure.
    Failed,
}

impl RunState {
    /// Map a server status label. Unknown labels count as running.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sub-task's state as reported in a session record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    /// Task id, when the server reported one.
    pub task_id: Option<String>,
    /// Scan type, when the server reported one.
    pub scan_type: Option<String>,
    /// Canonical state.
    pub status: RunState,
    /// Label as sent by the server.
    pub raw_status: String,
}

/// Reconciled status handed to tracker callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Registered session id.
    pub session_id: SessionId,
    /// Canonical state.
    pub status: RunState,
    /// Number of scans in the job.
    pub total_scans: u32,
    /// Scans that completed.
    pub completed_scans: u32,
    /// Scans that failed.
    pub failed_scans: u32,
    /// Scans still running.
    pub running_scans: u32,
    /// Per-task detail. Empty for flat job records.
    pub tasks: Vec<TaskStatus>,
    /// Top-level status label as sent by the server, if any.
    pub raw_status: Option<String>,
}

impl JobStatus {
    /// Terminal failure synthesized when polling hits a fatal error: every
    /// declared sub-task failed, none completed.
    pub fn synthesized_failure(session_id: SessionId, declared_tasks: usize) -> Self {
        let total = u32::try_from(declared_tasks.max(1)).unwrap_or(u32::MAX);
        Self {
            session_id,
            status: RunState::Failed,
            total_scans: total,
            completed_scans: 0,
            failed_scans: total,
            running_scans: 0,
            tasks: Vec::new(),
            raw_status: None,
        }
    }

    /// Whether no further transitions will occur.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

/// A decoded poll response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PollResponse {
    /// Flat job status.
    Job(JobRecord),
    /// Aggregated session status.
    Session(SessionRecord),
}

/// Flat job record.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JobRecord {
    /// Id echoed by the server.
    #[serde(alias = "scan_id")]
    pub job_id: String,
    /// Status label.
    pub status: String,
}

/// Aggregated session record.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionRecord {
    /// Id echoed by the server.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The session's own status label.
    #[serde(default)]
    pub status: Option<String>,
    /// Sub-task records.
    #[serde(alias = "tasks", alias = "scan_tasks")]
    pub scans: Vec<TaskRecord>,
}

/// One sub-task inside a session record.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    #[serde(default, alias = "scan_id")]
    pub task_id: Option<String>,
    /// Scan type.
    #[serde(default)]
    pub scan_type: Option<String>,
    /// Status label. Missing or `null` counts as running.
    #[serde(default)]
    pub status: Option<String>,
}

const LIST_KEYS: [&str; 3] = ["scans", "tasks", "scan_tasks"];
const JOB_ID_KEYS: [&str; 2] = ["job_id", "scan_id"];

impl PollResponse {
    /// Decode a response body.
    ///
    /// A body whose keys name a known shape but whose fields do not decode is
    /// [`ResponseError::Malformed`]; anything else unknown is
    /// [`ResponseError::Unrecognized`].
    pub fn parse(body: Value) -> Result<Self, ResponseError> {
        let Some(object) = body.as_object() else {
            return Err(ResponseError::Unrecognized(format!(
                "expected a JSON object, got {}",
                kind_of(&body)
            )));
        };

        if let Some(kind) = object.get("kind") {
            let shape = match kind.as_str() {
                Some("job") => "job",
                Some("session") => "session",
                _ => return Err(ResponseError::Unrecognized(format!("unknown kind {kind}"))),
            };
            return serde_json::from_value(body).map_err(|e| ResponseError::Malformed {
                shape,
                reason: e.to_string(),
            });
        }

        if LIST_KEYS.iter().any(|k| object.get(*k).is_some_and(Value::is_array)) {
            return serde_json::from_value(body)
                .map(Self::Session)
                .map_err(|e| ResponseError::Malformed {
                    shape: "session",
                    reason: e.to_string(),
                });
        }

        let has_job_id = JOB_ID_KEYS.iter().any(|k| object.contains_key(*k));
        if has_job_id && object.get("status").is_some_and(Value::is_string) {
            return serde_json::from_value(body)
                .map(Self::Job)
                .map_err(|e| ResponseError::Malformed {
                    shape: "job",
                    reason: e.to_string(),
                });
        }

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Err(ResponseError::Unrecognized(format!(
            "unrecognized response shape with keys [{}]",
            keys.join(", ")
        )))
    }

    /// Id the server echoed back, if any.
    pub fn echoed_id(&self) -> Option<&str> {
        match self {
            Self::Job(job) => Some(&job.job_id),
            Self::Session(session) => session.session_id.as_deref(),
        }
    }

    /// Reduce to a canonical [`JobStatus`] for `session_id`.
    pub fn reconcile(self, session_id: &SessionId) -> JobStatus {
        match self {
            Self::Job(job) => reconcile_job(session_id, job),
            Self::Session(session) => reconcile_session(session_id, session),
        }
    }
}

fn reconcile_job(session_id: &SessionId, job: JobRecord) -> JobStatus {
    let status = RunState::from_label(&job.status);
    JobStatus {
        session_id: session_id.clone(),
        status,
        total_scans: 1,
        completed_scans: u32::from(status == RunState::Completed),
        failed_scans: u32::from(status == RunState::Failed),
        running_scans: u32::from(status == RunState::Running),
        tasks: Vec::new(),
        raw_status: Some(job.status),
    }
}

fn reconcile_session(session_id: &SessionId, session: SessionRecord) -> JobStatus {
    let tasks: Vec<TaskStatus> = session
        .scans
        .into_iter()
        .map(|t| {
            let raw_status = t.status.unwrap_or_default();
            TaskStatus {
                task_id: t.task_id,
                scan_type: t.scan_type,
                status: RunState::from_label(&raw_status),
                raw_status,
            }
        })
        .collect();

    let (mut completed, mut failed, mut running) = (0u32, 0u32, 0u32);
    for task in &tasks {
        match task.status {
            RunState::Completed => completed += 1,
            RunState::Failed => failed += 1,
            RunState::Running => running += 1,
        }
    }

    let own = session.status.as_deref().map(RunState::from_label);
    let status = match own {
        Some(state) if state.is_terminal() => state,
        _ if !tasks.is_empty() && running == 0 => {
            if completed == 0 && failed > 0 {
                RunState::Failed
            } else {
                RunState::Completed
            }
        }
        _ => RunState::Running,
    };

    JobStatus {
        session_id: session_id.clone(),
        status,
        total_scans: completed + failed + running,
        completed_scans: completed,
        failed_scans: failed,
        running_scans: running,
        tasks,
        raw_status: session.status,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Status label of an opaque per-task payload, if it has one.
pub fn task_status_label(body: &Value) -> Option<&str> {
    body.get("status").and_then(Value::as_str)
}
