use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskbridge_core::{PollOutcome, RequestId, TerminalStatus};

/// A domain-agnostic event trait for event-sourced aggregates.
///
/// Events represent **facts that happened** in the domain - they are immutable,
/// versioned by their type name, and designed to be append-only.
///
/// ## Event Sourcing Philosophy
///
/// Events are the **source of truth** in event sourcing:
///
/// - **Immutable**: Events represent facts that occurred - they cannot be changed or deleted
/// - **Append-only**: New events are appended to streams; old events are never modified
/// - **Replayable**: State can be rebuilt by replaying events in order
///
/// This enables an audit trail, time-travel by replay, and multiple projections
/// built from the same stream.
///
/// ## Design Constraints
///
/// Events must be:
/// - **Serializable**: Events are serialized to JSON for storage/transport
/// - **Cloneable**: Events are copied when building aggregates and projections
/// - **Send + Sync**: Events cross thread boundaries (event bus, projections)
/// - **'static**: Events don't contain borrowed data (must own all data)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier, e.g. `"request.discovered.v1"`.
    ///
    /// The `v1` suffix stands in for the schema version directly rather than
    /// via a separate `version()` accessor: this catalog is closed and small
    /// enough that a new version is just a new variant and a new type string.
    ///
    /// Convention: `{subject}.{action}.v{n}`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time, not storage time).
    ///
    /// These can differ under retries and clock skew; business time is what
    /// handlers and projections reason about, storage time is an
    /// infrastructure concern (see `StoredEvent` in `taskbridge-ports`).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// `request.discovered.v1`: an intake row was claimed for processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDiscovered {
    pub request_id: RequestId,
    pub partition_key: String,
    pub row_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// `submission.prepared.v1`: a submission attempt was prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPrepared {
    pub request_id: RequestId,
    pub partition_key: String,
    pub row_key: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// `job.submitted.v1`: the external service accepted the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmitted {
    pub request_id: RequestId,
    pub partition_key: String,
    pub row_key: String,
    pub external_job_id: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// `job.pollrequested.v1`: a poll of the external job was dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPollRequested {
    pub request_id: RequestId,
    pub external_job_id: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// `job.terminal.v1`: the external job reached a terminal or can-retry outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTerminal {
    pub request_id: RequestId,
    pub external_job_id: String,
    pub terminal_status: PollOutcome,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// `request.completed.v1`: the request reached `Pass` or `Fail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCompleted {
    pub request_id: RequestId,
    pub final_status: TerminalStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Closed sum over the event catalog.
///
/// Handler and projection dispatch match on this enum rather than on the
/// wire `eventType` string; the string only matters at the storage/transport
/// boundary (see `EventEnvelope`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum WorkflowEvent {
    #[serde(rename = "request.discovered.v1")]
    RequestDiscovered(RequestDiscovered),
    #[serde(rename = "submission.prepared.v1")]
    SubmissionPrepared(SubmissionPrepared),
    #[serde(rename = "job.submitted.v1")]
    JobSubmitted(JobSubmitted),
    #[serde(rename = "job.pollrequested.v1")]
    JobPollRequested(JobPollRequested),
    #[serde(rename = "job.terminal.v1")]
    JobTerminal(JobTerminal),
    #[serde(rename = "request.completed.v1")]
    RequestCompleted(RequestCompleted),
}

impl WorkflowEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            WorkflowEvent::RequestDiscovered(e) => &e.request_id,
            WorkflowEvent::SubmissionPrepared(e) => &e.request_id,
            WorkflowEvent::JobSubmitted(e) => &e.request_id,
            WorkflowEvent::JobPollRequested(e) => &e.request_id,
            WorkflowEvent::JobTerminal(e) => &e.request_id,
            WorkflowEvent::RequestCompleted(e) => &e.request_id,
        }
    }
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::RequestDiscovered(_) => "request.discovered.v1",
            WorkflowEvent::SubmissionPrepared(_) => "submission.prepared.v1",
            WorkflowEvent::JobSubmitted(_) => "job.submitted.v1",
            WorkflowEvent::JobPollRequested(_) => "job.pollrequested.v1",
            WorkflowEvent::JobTerminal(_) => "job.terminal.v1",
            WorkflowEvent::RequestCompleted(_) => "request.completed.v1",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkflowEvent::RequestDiscovered(e) => e.occurred_at,
            WorkflowEvent::SubmissionPrepared(e) => e.occurred_at,
            WorkflowEvent::JobSubmitted(e) => e.occurred_at,
            WorkflowEvent::JobPollRequested(e) => e.occurred_at,
            WorkflowEvent::JobTerminal(e) => e.occurred_at,
            WorkflowEvent::RequestCompleted(e) => e.occurred_at,
        }
    }
}


