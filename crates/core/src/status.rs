//! Status enums shared by the aggregate, the projection, and the event
//! catalog payloads.

use serde::{Deserialize, Serialize};

/// Status tracked by the in-memory aggregate and by `RequestProjection`.
///
/// Unlike `IntakeStatus` (owned by the intake store, see `taskbridge-ports`)
/// this has no `Unprocessed` variant: by the time a stream exists the
/// aggregate is always at least `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    InProgress,
    Pass,
    Fail,
}

impl WorkItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Pass | WorkItemStatus::Fail)
    }
}

/// Final status recorded on `request.completed.v1` and mirrored onto the
/// intake row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Pass,
    Fail,
}

impl From<TerminalStatus> for WorkItemStatus {
    fn from(value: TerminalStatus) -> Self {
        match value {
            TerminalStatus::Pass => WorkItemStatus::Pass,
            TerminalStatus::Fail => WorkItemStatus::Fail,
        }
    }
}

/// Outcome recorded on `job.terminal.v1`.
///
/// `FailCanRetry` is intentionally distinct from `Fail`: the Poll handler
/// (`taskbridge-handlers`) never emits `job.terminal.v1{FailCanRetry}` — a
/// can-retry outcome either becomes a fresh `submission.prepared.v1` or is
/// coerced to `Fail` once retries are exhausted. The variant exists here
/// because the Complete handler must still be able to deserialize and
/// defensively handle one if it ever sees it (a producer bug).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    Pass,
    Fail,
    FailCanRetry,
}

impl PollOutcome {
    /// Maps a poll outcome to the final status written by Complete.
    /// `FailCanRetry` maps to `Fail` — see the module doc above.
    pub fn to_final(self) -> TerminalStatus {
        match self {
            PollOutcome::Pass => TerminalStatus::Pass,
            PollOutcome::Fail | PollOutcome::FailCanRetry => TerminalStatus::Fail,
        }
    }
}
