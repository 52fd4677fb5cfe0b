//! `RequestProjection`: the read model Discover and ScheduleDuePolls scan,
//! and the pure `reduce` function that builds it.
//!
//! This crate is deliberately storage-free: `reduce` takes a projection and
//! an event and returns a new projection, nothing more. Persistence lives in
//! `taskbridge-ports::ProjectionRepository` and its adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use taskbridge_core::{RequestId, WorkItemStatus};
use taskbridge_events::WorkflowEvent;

/// The read model row maintained per `RequestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestProjection {
    pub request_id: RequestId,
    pub partition_key: String,
    pub row_key: String,
    pub status: WorkItemStatus,
    pub submit_attempt_count: u32,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub external_job_id: Option<String>,
    /// Version of the last event folded into this projection. Monotonic:
    /// `reduce` treats any event at or below this version as a no-op.
    pub last_applied_event_version: u64,
    pub updated_at: DateTime<Utc>,
}

impl RequestProjection {
    fn fresh(request_id: RequestId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            partition_key: request_id.partition_key().to_string(),
            row_key: request_id.row_key().to_string(),
            request_id,
            status: WorkItemStatus::InProgress,
            submit_attempt_count: 0,
            next_poll_at: None,
            external_job_id: None,
            last_applied_event_version: 0,
            updated_at: occurred_at,
        }
    }

    pub fn is_due_for_poll(&self, as_of: DateTime<Utc>) -> bool {
        self.status == WorkItemStatus::InProgress
            && self
                .next_poll_at
                .map(|due| due <= as_of)
                .unwrap_or(false)
    }
}

/// Fold one event, at `version`, into `current` (or create a fresh
/// projection if `current` is `None`). Returns the unchanged projection
/// (cloned) when `version` does not exceed `last_applied_event_version`.
pub fn reduce(
    current: Option<&RequestProjection>,
    version: u64,
    event: &WorkflowEvent,
    poll_interval: Duration,
) -> RequestProjection {
    if let Some(current) = current {
        if version <= current.last_applied_event_version {
            return current.clone();
        }
    }

    let occurred_at = taskbridge_events::Event::occurred_at(event);

    let mut next = match event {
        WorkflowEvent::RequestDiscovered(e) => RequestProjection::fresh(e.request_id.clone(), occurred_at),
        WorkflowEvent::SubmissionPrepared(e) => {
            let mut p = current
                .cloned()
                .unwrap_or_else(|| RequestProjection::fresh(e.request_id.clone(), occurred_at));
            if e.attempt > p.submit_attempt_count {
                p.external_job_id = None;
                p.next_poll_at = None;
            }
            p.status = WorkItemStatus::InProgress;
            p
        }
        WorkflowEvent::JobSubmitted(e) => {
            let mut p = current
                .cloned()
                .unwrap_or_else(|| RequestProjection::fresh(e.request_id.clone(), occurred_at));
            p.external_job_id = Some(e.external_job_id.clone());
            p.next_poll_at = Some(occurred_at + chrono::Duration::from_std(poll_interval).unwrap_or_default());
            p.submit_attempt_count = p.submit_attempt_count.max(e.attempt);
            p
        }
        WorkflowEvent::JobPollRequested(e) => {
            let mut p = current
                .cloned()
                .unwrap_or_else(|| RequestProjection::fresh(e.request_id.clone(), occurred_at));
            p.next_poll_at = Some(occurred_at + chrono::Duration::from_std(poll_interval).unwrap_or_default());
            p
        }
        WorkflowEvent::JobTerminal(e) => {
            let mut p = current
                .cloned()
                .unwrap_or_else(|| RequestProjection::fresh(e.request_id.clone(), occurred_at));
            // FailCanRetry is handled upstream (SubmitJob/Poll decide whether
            // to re-prepare or coerce to Fail); the projection only ever
            // records a genuine Pass/Fail here.
            if e.terminal_status != taskbridge_core::PollOutcome::FailCanRetry {
                p.status = e.terminal_status.to_final().into();
            }
            p.next_poll_at = None;
            p
        }
        WorkflowEvent::RequestCompleted(e) => {
            let mut p = current
                .cloned()
                .unwrap_or_else(|| RequestProjection::fresh(e.request_id.clone(), occurred_at));
            p.status = e.final_status.into();
            p.next_poll_at = None;
            p
        }
    };

    next.last_applied_event_version = version;
    next.updated_at = occurred_at;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::Strategy;
    use taskbridge_events::{JobSubmitted, RequestDiscovered};

    fn req() -> RequestId {
        RequestId::new("p1", "r1").unwrap()
    }

    #[test]
    fn discovered_creates_fresh_in_progress_projection() {
        let now = Utc::now();
        let ev = WorkflowEvent::RequestDiscovered(RequestDiscovered {
            request_id: req(),
            partition_key: "p1".into(),
            row_key: "r1".into(),
            occurred_at: now,
        });
        let p = reduce(None, 1, &ev, Duration::from_secs(300));
        assert_eq!(p.status, WorkItemStatus::InProgress);
        assert_eq!(p.submit_attempt_count, 0);
        assert_eq!(p.last_applied_event_version, 1);
    }

    #[test]
    fn stale_version_is_a_no_op() {
        let now = Utc::now();
        let ev = WorkflowEvent::RequestDiscovered(RequestDiscovered {
            request_id: req(),
            partition_key: "p1".into(),
            row_key: "r1".into(),
            occurred_at: now,
        });
        let p1 = reduce(None, 5, &ev, Duration::from_secs(300));
        let p2 = reduce(Some(&p1), 3, &ev, Duration::from_secs(300));
        assert_eq!(p1, p2);
    }

    #[test]
    fn submitted_sets_next_poll_at_from_poll_interval() {
        let now = Utc::now();
        let discovered = WorkflowEvent::RequestDiscovered(RequestDiscovered {
            request_id: req(),
            partition_key: "p1".into(),
            row_key: "r1".into(),
            occurred_at: now,
        });
        let p0 = reduce(None, 1, &discovered, Duration::from_secs(300));

        let submitted = WorkflowEvent::JobSubmitted(JobSubmitted {
            request_id: req(),
            partition_key: "p1".into(),
            row_key: "r1".into(),
            external_job_id: "ext-1".into(),
            attempt: 1,
            occurred_at: now,
        });
        let p1 = reduce(Some(&p0), 2, &submitted, Duration::from_secs(300));
        assert_eq!(p1.external_job_id.as_deref(), Some("ext-1"));
        assert_eq!(p1.next_poll_at, Some(now + chrono::Duration::seconds(300)));
        assert_eq!(p1.submit_attempt_count, 1);
    }

    fn arb_event() -> impl proptest::strategy::Strategy<Value = WorkflowEvent> {
        let now = Utc::now();
        proptest::prop_oneof![
            proptest::strategy::Just(WorkflowEvent::RequestDiscovered(RequestDiscovered {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                occurred_at: now,
            })),
            (1u32..5).prop_map(move |attempt| WorkflowEvent::SubmissionPrepared(
                taskbridge_events::SubmissionPrepared {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    attempt,
                    occurred_at: now,
                }
            )),
            (1u32..5).prop_map(move |attempt| WorkflowEvent::JobSubmitted(JobSubmitted {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                external_job_id: "ext-1".into(),
                attempt,
                occurred_at: now,
            })),
        ]
    }

    proptest::proptest! {
        /// `reduce(p, e)` with `e.version <= p.last_applied_event_version`
        /// returns `p` unchanged, regardless of which event type is offered.
        #[test]
        fn reduce_is_a_no_op_below_last_applied_version(
            base_version in 1u64..50,
            stale_offset in 0u64..50,
            event in arb_event(),
        ) {
            let seed = WorkflowEvent::RequestDiscovered(RequestDiscovered {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                occurred_at: Utc::now(),
            });
            let current = reduce(None, base_version, &seed, Duration::from_secs(300));
            let stale_version = base_version.saturating_sub(stale_offset);

            let result = reduce(Some(&current), stale_version, &event, Duration::from_secs(300));
            proptest::prop_assert_eq!(result, current);
        }
    }
}
