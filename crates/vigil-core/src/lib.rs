//! # vigil-core
//!
//! Shared vocabulary for the Vigil real-time core.
//!
//! - **Envelopes**: [`Envelope`] (wire unit) and [`StoredMessage`] (buffered copy)
//! - **Branded IDs**: [`MessageId`], [`SessionId`], [`TaskId`]
//! - **Event types**: string constants for every recognized `type` discriminator
//! - **Backoff**: reconnect delay math in [`retry`]
//! - **Clock**: injectable time source so buffers can be tested at simulated instants
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod envelope;
pub mod event_types;
pub mod ids;
pub mod logging;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{Envelope, EnvelopeError, StoredMessage, ENTITY_ID_KEYS};
pub use ids::{MessageId, SessionId, TaskId};
