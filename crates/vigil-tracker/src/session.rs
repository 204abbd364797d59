//! Scan session descriptors.
//!
//! The session-initiation call answers with a [`ScanSessionResponse`];
//! [`JobDescriptor`] is the subset the tracker needs.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use vigil_core::{SessionId, TaskId};

/// Body returned when a scan session is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSessionResponse {
    /// The new session.
    pub session_id: String,
    /// Where to poll.
    pub tracking_urls: TrackingUrls,
    /// The scans the session will run.
    #[serde(default)]
    pub scans: Vec<ScanSummary>,
    /// Target node.
    #[serde(default)]
    pub node_uuid: Option<String>,
    /// Owning organization.
    #[serde(default)]
    pub organization_uuid: Option<String>,
    /// Number of scans in the session.
    #[serde(default)]
    pub total_scans: Option<u32>,
    /// Creation timestamp, passed through verbatim.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Polling endpoints for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingUrls {
    /// Session status endpoint.
    pub session: String,
    /// Per-task status endpoints keyed by task id.
    #[serde(default)]
    pub scan_tasks: Option<BTreeMap<String, String>>,
}

/// One scan within a created session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Task id.
    #[serde(alias = "task_id")]
    pub scan_id: String,
    /// Scan type, e.g. `port`.
    #[serde(default)]
    pub scan_type: Option<String>,
    /// Initial status.
    #[serde(default)]
    pub status: Option<String>,
}

/// What the tracker needs to supervise a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Registered session id; the poll loop is keyed by it.
    pub session_id: SessionId,
    /// Session status endpoint.
    pub tracking_endpoint: String,
    /// Declared sub-tasks.
    pub sub_tasks: Vec<TaskInfo>,
    /// Scan count the server declared for the session, if it sent one.
    pub total_scans: Option<u32>,
}

/// One declared sub-task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task id.
    pub task_id: TaskId,
    /// Scan type, if known.
    pub scan_type: Option<String>,
    /// Per-task status endpoint. Polled for observability when present.
    pub tracking_endpoint: Option<String>,
}

impl JobDescriptor {
    /// A descriptor with no sub-tasks.
    pub fn new(session_id: impl Into<SessionId>, tracking_endpoint: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tracking_endpoint: tracking_endpoint.into(),
            sub_tasks: Vec::new(),
            total_scans: None,
        }
    }

    /// Add a sub-task.
    #[must_use]
    pub fn with_task(
        mut self,
        task_id: impl Into<TaskId>,
        tracking_endpoint: Option<impl Into<String>>,
    ) -> Self {
        self.sub_tasks.push(TaskInfo {
            task_id: task_id.into(),
            scan_type: None,
            tracking_endpoint: tracking_endpoint.map(Into::into),
        });
        self
    }

    /// Number of scans the session runs: the server's declared total when it
    /// sent one, else the number of sub-tasks.
    pub fn scan_count(&self) -> usize {
        self.total_scans
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(self.sub_tasks.len())
    }

    /// Sub-tasks with their own endpoint.
    pub fn pollable_tasks(&self) -> impl Iterator<Item = (&TaskId, &str)> {
        self.sub_tasks
            .iter()
            .filter_map(|t| t.tracking_endpoint.as_deref().map(|e| (&t.task_id, e)))
    }
}

impl From<ScanSessionResponse> for JobDescriptor {
    /// Declared scans keep their order; task endpoints without a matching
    /// scan are appended in key order. `total_scans` is carried as sent, so
    /// appended endpoints do not change the scan count.
    fn from(response: ScanSessionResponse) -> Self {
        let mut endpoints = response.tracking_urls.scan_tasks.unwrap_or_default();
        let mut seen = HashSet::new();
        let mut sub_tasks: Vec<TaskInfo> = response
            .scans
            .into_iter()
            .filter(|scan| seen.insert(scan.scan_id.clone()))
            .map(|scan| TaskInfo {
                tracking_endpoint: endpoints.remove(&scan.scan_id),
                task_id: TaskId::from(scan.scan_id),
                scan_type: scan.scan_type,
            })
            .collect();
        sub_tasks.extend(endpoints.into_iter().map(|(task_id, endpoint)| TaskInfo {
            task_id: TaskId::from(task_id),
            scan_type: None,
            tracking_endpoint: Some(endpoint),
        }));
        Self {
            session_id: SessionId::from(response.session_id),
            tracking_endpoint: response.tracking_urls.session,
            sub_tasks,
            total_scans: response.total_scans,
        }
    }
}
