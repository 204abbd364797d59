//! # vigil-tracker
//!
//! HTTP polling supervisor for multi-stage scan sessions.
//!
//! - [`ScanTracker`]: one poll loop per session plus optional per-task polls,
//!   stopped exactly once on a terminal status, a fatal HTTP error, or request
//! - [`PollResponse`]: the two server response shapes, reconciled to [`JobStatus`]
//! - [`JobDescriptor`]: what to track, usually built from a [`ScanSessionResponse`]
//! - [`StatusClient`]: the fetch seam, with a `reqwest` implementation

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod session;
pub mod status;
pub mod tracker;

pub use client::{ReqwestStatusClient, StatusClient};
pub use errors::{FetchError, ResponseError, Result, TrackerError};
pub use session::{JobDescriptor, ScanSessionResponse, ScanSummary, TaskInfo, TrackingUrls};
pub use status::{JobStatus, PollResponse, RunState, TaskStatus};
pub use tracker::{ScanTracker, StatusCallback};
