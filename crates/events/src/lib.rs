//! The event catalog and wire envelope shared by the domain aggregate, the
//! read-model projection, and every adapter that stores or publishes
//! events.

mod envelope;
mod event;

pub use envelope::EventEnvelope;
pub use event::{
    Event, JobPollRequested, JobSubmitted, JobTerminal, RequestCompleted, RequestDiscovered,
    SubmissionPrepared, WorkflowEvent,
};
