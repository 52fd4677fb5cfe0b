//! The `Aggregate`: pure, in-memory rehydration of a request's history into
//! its current decision-relevant state.
//!
//! This is intentionally small and has no storage or port dependency —
//! handlers load a `StoredEvent` stream from `taskbridge_ports::EventStore`,
//! decode it, and call `rehydrate` to get the state they decide against.

use std::collections::BTreeSet;

use taskbridge_core::{PollOutcome, RequestId, WorkItemStatus};
use taskbridge_events::WorkflowEvent;

/// Aggregate root marker + minimal interface, mirroring the shape used
/// elsewhere in this workspace for event-sourced state.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version — the stream revision this
    /// aggregate was rehydrated through.
    fn version(&self) -> u64;
}

/// In-memory state folded from a request's event stream.
///
/// Carries just enough to decide the next handler action: which attempts
/// have already been prepared or submitted (so a handler reacting to an
/// out-of-order or duplicate delivery can recognize it already happened),
/// the current external job id, and whether the request has already
/// reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    request_id: RequestId,
    version: u64,
    status: WorkItemStatus,
    prepared_attempts: BTreeSet<u32>,
    submitted_attempts: BTreeSet<u32>,
    submit_attempt_count: u32,
    external_job_id: Option<String>,
}

impl Aggregate {
    fn empty(request_id: RequestId) -> Self {
        Self {
            request_id,
            version: 0,
            status: WorkItemStatus::InProgress,
            prepared_attempts: BTreeSet::new(),
            submitted_attempts: BTreeSet::new(),
            submit_attempt_count: 0,
            external_job_id: None,
        }
    }

    pub fn status(&self) -> WorkItemStatus {
        self.status
    }

    pub fn submit_attempt_count(&self) -> u32 {
        self.submit_attempt_count
    }

    pub fn external_job_id(&self) -> Option<&str> {
        self.external_job_id.as_deref()
    }

    pub fn has_prepared(&self, attempt: u32) -> bool {
        self.prepared_attempts.contains(&attempt)
    }

    pub fn has_submitted(&self, attempt: u32) -> bool {
        self.submitted_attempts.contains(&attempt)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl AggregateRoot for Aggregate {
    type Id = RequestId;

    fn id(&self) -> &RequestId {
        &self.request_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Rehydrate an aggregate by folding `history` (version, event) pairs, sorted
/// by version ascending, in order. `history` need not already be sorted —
/// rehydrate sorts defensively, since callers that load directly from a
/// store already return it in order but tests and the deterministic-
/// republish path sometimes assemble a slice by hand.
pub fn rehydrate(request_id: &RequestId, history: &[(u64, WorkflowEvent)]) -> Aggregate {
    let mut ordered: Vec<&(u64, WorkflowEvent)> = history.iter().collect();
    ordered.sort_by_key(|(version, _)| *version);

    let mut agg = Aggregate::empty(request_id.clone());

    for (version, event) in ordered {
        match event {
            WorkflowEvent::RequestDiscovered(_) => {
                agg.status = WorkItemStatus::InProgress;
            }
            WorkflowEvent::SubmissionPrepared(e) => {
                agg.prepared_attempts.insert(e.attempt);
            }
            WorkflowEvent::JobSubmitted(e) => {
                agg.submitted_attempts.insert(e.attempt);
                agg.submit_attempt_count = agg.submit_attempt_count.max(e.attempt);
                agg.external_job_id = Some(e.external_job_id.clone());
                agg.status = WorkItemStatus::InProgress;
            }
            WorkflowEvent::JobTerminal(e) => {
                // FailCanRetry is not terminal for the aggregate: status is
                // left unchanged, matching the invariant that SubmitJob (not
                // the aggregate) decides whether a can-retry outcome starts
                // a fresh attempt or is coerced to a terminal Fail.
                if e.terminal_status != PollOutcome::FailCanRetry {
                    agg.status = e.terminal_status.to_final().into();
                }
            }
            WorkflowEvent::RequestCompleted(e) => {
                agg.status = e.final_status.into();
            }
            WorkflowEvent::JobPollRequested(_) => {}
        }
        agg.version = *version;
    }

    agg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskbridge_core::TerminalStatus;
    use taskbridge_events::{
        JobSubmitted, JobTerminal, RequestCompleted, RequestDiscovered, SubmissionPrepared,
    };

    fn req() -> RequestId {
        RequestId::new("p1", "r1").unwrap()
    }

    #[test]
    fn empty_history_yields_in_progress_zero_version() {
        let agg = rehydrate(&req(), &[]);
        assert_eq!(agg.version(), 0);
        assert_eq!(agg.status(), WorkItemStatus::InProgress);
        assert!(!agg.is_terminal());
    }

    #[test]
    fn fail_can_retry_does_not_mark_terminal() {
        let now = Utc::now();
        let history = vec![
            (
                1,
                WorkflowEvent::RequestDiscovered(RequestDiscovered {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    occurred_at: now,
                }),
            ),
            (
                2,
                WorkflowEvent::SubmissionPrepared(SubmissionPrepared {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    attempt: 1,
                    occurred_at: now,
                }),
            ),
            (
                3,
                WorkflowEvent::JobSubmitted(JobSubmitted {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    external_job_id: "ext-1".into(),
                    attempt: 1,
                    occurred_at: now,
                }),
            ),
            (
                4,
                WorkflowEvent::JobTerminal(JobTerminal {
                    request_id: req(),
                    external_job_id: "ext-1".into(),
                    terminal_status: PollOutcome::FailCanRetry,
                    attempt: 1,
                    occurred_at: now,
                }),
            ),
        ];
        let agg = rehydrate(&req(), &history);
        assert!(!agg.is_terminal());
        assert_eq!(agg.status(), WorkItemStatus::InProgress);
        assert!(agg.has_submitted(1));
    }

    #[test]
    fn completed_sets_terminal_status_from_final() {
        let now = Utc::now();
        let history = vec![
            (
                1,
                WorkflowEvent::RequestDiscovered(RequestDiscovered {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    occurred_at: now,
                }),
            ),
            (
                2,
                WorkflowEvent::RequestCompleted(RequestCompleted {
                    request_id: req(),
                    final_status: TerminalStatus::Fail,
                    occurred_at: now,
                }),
            ),
        ];
        let agg = rehydrate(&req(), &history);
        assert!(agg.is_terminal());
        assert_eq!(agg.status(), WorkItemStatus::Fail);
    }

    #[test]
    fn out_of_order_history_is_sorted_before_folding() {
        let now = Utc::now();
        let discovered = (
            1,
            WorkflowEvent::RequestDiscovered(RequestDiscovered {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                occurred_at: now,
            }),
        );
        let prepared = (
            2,
            WorkflowEvent::SubmissionPrepared(SubmissionPrepared {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                attempt: 1,
                occurred_at: now,
            }),
        );
        let forward = rehydrate(&req(), &[discovered.clone(), prepared.clone()]);
        let reversed = rehydrate(&req(), &[prepared, discovered]);
        assert_eq!(forward, reversed);
    }

    fn build_history(num_attempts: u32) -> Vec<(u64, WorkflowEvent)> {
        let now = Utc::now();
        let mut history = vec![(
            1,
            WorkflowEvent::RequestDiscovered(RequestDiscovered {
                request_id: req(),
                partition_key: "p1".into(),
                row_key: "r1".into(),
                occurred_at: now,
            }),
        )];
        let mut version = 1u64;
        for attempt in 1..=num_attempts {
            version += 1;
            history.push((
                version,
                WorkflowEvent::SubmissionPrepared(SubmissionPrepared {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    attempt,
                    occurred_at: now,
                }),
            ));
            version += 1;
            history.push((
                version,
                WorkflowEvent::JobSubmitted(JobSubmitted {
                    request_id: req(),
                    partition_key: "p1".into(),
                    row_key: "r1".into(),
                    external_job_id: format!("ext-{attempt}"),
                    attempt,
                    occurred_at: now,
                }),
            ));
        }
        history
    }

    proptest::proptest! {
        /// `rehydrate` is a function of the set of (version, event) pairs
        /// alone, not the order they're handed in — the fold sorts by
        /// version before folding.
        #[test]
        fn rehydrate_ignores_input_list_order(
            num_attempts in 1u32..5,
            shuffle_keys in proptest::collection::vec(proptest::prelude::any::<u32>(), 0..20),
        ) {
            let history = build_history(num_attempts);

            let mut keyed: Vec<(u32, (u64, WorkflowEvent))> = history
                .clone()
                .into_iter()
                .enumerate()
                .map(|(i, item)| (*shuffle_keys.get(i).unwrap_or(&(i as u32)), item))
                .collect();
            keyed.sort_by_key(|(key, _)| *key);
            let shuffled: Vec<(u64, WorkflowEvent)> = keyed.into_iter().map(|(_, item)| item).collect();

            let forward = rehydrate(&req(), &history);
            let reordered = rehydrate(&req(), &shuffled);
            proptest::prop_assert_eq!(forward, reordered);
        }
    }
}
