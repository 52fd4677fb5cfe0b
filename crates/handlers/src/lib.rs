//! The six workflow handlers chained by event type
//! and the idempotency/cancellation/republish machinery they share.

mod complete_request;
mod discover;
mod error;
mod poll_external_job;
mod prepare_submission;
mod schedule_due_polls;
mod submit_job;
pub mod support;

pub use complete_request::CompleteRequest;
pub use discover::Discover;
pub use error::{HandlerError, HandlerResult};
pub use poll_external_job::PollExternalJob;
pub use prepare_submission::PrepareSubmission;
pub use schedule_due_polls::ScheduleDuePolls;
pub use submit_job::SubmitJob;
