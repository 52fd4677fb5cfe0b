//! `WorkflowConfig`: the tunables shared by every handler and scheduler.
//!
//! The struct lives here (not in `taskbridge-config`) so that handlers and
//! adapters can depend on its shape without depending on the env-loading
//! crate; `taskbridge-config` only knows how to *populate* one.

use std::time::Duration;

/// Tunable parameters governing batch sizes, lease durations, and retry
/// limits. All durations are `std::time::Duration` rather than a bespoke
/// newtype, matching how the rest of this workspace expresses intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Max rows Discover claims per scan.
    pub intake_batch_size: usize,
    /// Max requests ScheduleDuePolls dispatches per scan.
    pub poll_batch_size: usize,
    /// How long a claimed-but-not-yet-discovered intake row's claim is valid
    /// before another Discover scan may reclaim it.
    pub lease_duration: Duration,
    /// How long an idempotency lease is held before it is eligible for takeover.
    pub idempotency_lease_duration: Duration,
    /// How long a submitted job waits before its first/next poll.
    pub poll_interval: Duration,
    /// Submission attempts allowed before a `FailCanRetry` is coerced to `Fail`.
    pub max_submit_attempts: u32,
    /// Interval between Discover scans.
    pub discover_interval: Duration,
    /// Interval between ScheduleDuePolls scans.
    pub schedule_poll_interval: Duration,
    /// Timeout applied to each external-service HTTP call.
    pub external_call_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            intake_batch_size: 50,
            poll_batch_size: 200,
            lease_duration: Duration::from_secs(30 * 60),
            idempotency_lease_duration: Duration::from_secs(2 * 60),
            poll_interval: Duration::from_secs(5 * 60),
            max_submit_attempts: 3,
            discover_interval: Duration::from_secs(15),
            schedule_poll_interval: Duration::from_secs(15),
            external_call_timeout: Duration::from_secs(10),
        }
    }
}
