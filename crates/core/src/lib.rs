//! Core domain types for the durable, event-sourced workflow engine:
//! the `RequestId` stream identifier, status enums shared by the aggregate
//! and projection, the domain error model, and the deterministic event-id
//! generator.
//!
//! Everything here is pure and has no knowledge of storage, transport, or
//! time — those live in `taskbridge-ports` and its adapters.

mod error;
mod event_id;
mod id;
mod status;

pub use error::{DomainError, DomainResult};
pub use event_id::create_deterministic;
pub use id::RequestId;
pub use status::{PollOutcome, TerminalStatus, WorkItemStatus};
