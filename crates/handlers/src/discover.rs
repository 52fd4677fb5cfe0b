//! Discover: the timer-driven handler that claims eligible intake rows
//! (unprocessed, or claimed with an expired lease) and starts their
//! aggregate streams.

use std::sync::Arc;

use taskbridge_core::RequestId;
use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, IntakeRepository,
    ProjectionRepository, UncommittedEvent, WorkflowConfig,
};

use crate::error::HandlerResult;
use crate::support::{finish_append, run_cancellable};

pub const HANDLER_NAME: &str = "Discover";

pub struct Discover<Es, Pr, Ir> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub intake_repo: Arc<Ir>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr, Ir> Discover<Es, Pr, Ir>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Ir: IntakeRepository,
{
    /// Scan up to `intakeBatchSize` rows eligible for claim (unprocessed, or
    /// claimed with an expired lease), claim each, and append
    /// `request.discovered.v1` idempotently via `expectedVersion=0`.
    pub async fn run(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        cancel: &CancelSignal,
    ) -> HandlerResult<usize> {
        let rows = self
            .intake_repo
            .list_unprocessed(self.config.intake_batch_size, now)
            .await
            .map_err(|e| crate::error::HandlerError::Port(e.into()))?;

        let mut discovered = 0usize;
        for row in rows {
            if cancel.is_cancelled() {
                break;
            }
            if self.discover_one(&row, now, cancel).await? {
                discovered += 1;
            }
        }
        Ok(discovered)
    }

    async fn discover_one(
        &self,
        row: &taskbridge_ports::IntakeRow,
        now: chrono::DateTime<chrono::Utc>,
        cancel: &CancelSignal,
    ) -> HandlerResult<bool> {
        run_cancellable(cancel, async {
            let request_id = RequestId::new(row.partition_key.clone(), row.row_key.clone())?;

            let lease_until = now
                + chrono::Duration::from_std(self.config.lease_duration).unwrap_or_default();
            let claimed = self
                .intake_repo
                .try_claim(&row.partition_key, &row.row_key, now, lease_until)
                .await
                .map_err(|e| crate::error::HandlerError::Port(e.into()))?;
            if !claimed {
                // Another worker holds a live lease on this row: back off,
                // the event store's expectedVersion=0 append is the real
                // exclusivity guarantee for the stream itself.
                return Ok(false);
            }

            let correlation_id = request_id.to_string();
            let event_id = taskbridge_core::create_deterministic(
                &request_id.to_string(),
                "request.discovered.v1",
                Some(&correlation_id),
                None,
                None,
            )?;

            let event = WorkflowEvent::RequestDiscovered(taskbridge_events::RequestDiscovered {
                request_id: request_id.clone(),
                partition_key: row.partition_key.clone(),
                row_key: row.row_key.clone(),
                occurred_at: now,
            });
            let uncommitted = UncommittedEvent::from_typed(event_id, &event, Some(correlation_id), None)
                .map_err(|e| crate::error::HandlerError::Port(e.into()))?;

            let stored = match self
                .event_store
                .append(&request_id, vec![uncommitted], ExpectedVersion::Exact(0))
                .await
            {
                Ok(stored) => stored,
                Err(taskbridge_ports::EventStoreError::Concurrency { .. }) => {
                    // Stream already exists: idempotent no-op, no publish.
                    return Ok(false);
                }
                Err(e) => return Err(crate::error::HandlerError::Port(e.into())),
            };

            let full_stream = self
                .event_store
                .load_stream(&request_id)
                .await
                .map_err(|e| crate::error::HandlerError::Port(e.into()))?;
            finish_append(
                self.projection_repo.as_ref(),
                self.publisher.as_ref(),
                &crate::support::publisher_source(HANDLER_NAME),
                self.config.poll_interval,
                &full_stream,
                &stored,
            )
            .await?;

            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use taskbridge_ports::{EventPublisher, WorkflowConfig};
    use taskbridge_testkit::{InMemoryEventBus, InMemoryEventStore, InMemoryIntakeRepository, InMemoryProjectionRepository};

    use super::*;

    fn handler() -> (
        Discover<InMemoryEventStore, InMemoryProjectionRepository, InMemoryIntakeRepository>,
        Arc<InMemoryIntakeRepository>,
        Arc<InMemoryEventStore>,
    ) {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let intake_repo = Arc::new(InMemoryIntakeRepository::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let handler = Discover {
            event_store: event_store.clone(),
            projection_repo,
            intake_repo: intake_repo.clone(),
            publisher: bus,
            config: WorkflowConfig::default(),
        };
        (handler, intake_repo, event_store)
    }

    #[tokio::test]
    async fn discovers_unprocessed_rows_and_claims_them() {
        let (handler, intake_repo, event_store) = handler();
        intake_repo.seed("p1", "r1", json!({"amount": 10}));

        let cancel = CancelSignal::new();
        let discovered = handler.run(chrono::Utc::now(), &cancel).await.unwrap();
        assert_eq!(discovered, 1);

        let request_id = RequestId::new("p1", "r1").unwrap();
        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].event_type, "request.discovered.v1");
        assert_eq!(
            intake_repo.status_of("p1", "r1"),
            Some(taskbridge_ports::IntakeStatus::Claimed)
        );
    }

    #[tokio::test]
    async fn rerunning_discover_on_an_already_discovered_row_is_a_no_op() {
        let (handler, intake_repo, event_store) = handler();
        intake_repo.seed("p1", "r1", json!({}));

        let cancel = CancelSignal::new();
        let now = chrono::Utc::now();
        handler.run(now, &cancel).await.unwrap();
        // The row's lease is still live, so the second scan doesn't even
        // list it — no reliance on the append-side duplicate check here.
        let discovered = handler.run(now, &cancel).await.unwrap();
        assert_eq!(discovered, 0);

        let request_id = RequestId::new("p1", "r1").unwrap();
        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 1);
    }

    /// A row claimed but never discovered (worker crashed between
    /// `try_claim` and the append) is not stuck forever — once its lease
    /// expires, the next scan re-lists and re-claims it.
    #[tokio::test]
    async fn discover_reclaims_a_row_whose_lease_expired_before_the_append() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let intake_repo = Arc::new(InMemoryIntakeRepository::new());
        intake_repo.seed("p1", "r1", json!({}));

        let claimed_at = chrono::Utc::now();
        let short_lease = claimed_at + chrono::Duration::seconds(1);
        // Simulate a crash: claim the row directly, without ever appending
        // `request.discovered.v1` for it.
        assert!(intake_repo
            .try_claim("p1", "r1", claimed_at, short_lease)
            .await
            .unwrap());

        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let mut config = WorkflowConfig::default();
        config.lease_duration = std::time::Duration::from_secs(1800);
        let handler = Discover {
            event_store: event_store.clone(),
            projection_repo,
            intake_repo,
            publisher: bus,
            config,
        };

        let after_expiry = short_lease + chrono::Duration::seconds(1);
        let cancel = CancelSignal::new();
        let discovered = handler.run(after_expiry, &cancel).await.unwrap();
        assert_eq!(discovered, 1, "expired-lease row must be reclaimed");

        let request_id = RequestId::new("p1", "r1").unwrap();
        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 1);
    }

    /// Two Discover workers race on the same row. `try_claim`'s conditional
    /// update picks exactly one winner; the loser returns `false` without
    /// ever reaching the event store, leaving a single-event stream.
    #[tokio::test]
    async fn concurrent_discover_of_the_same_row_appends_exactly_once() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo_a = Arc::new(InMemoryProjectionRepository::new());
        let projection_repo_b = Arc::new(InMemoryProjectionRepository::new());
        let intake_repo = Arc::new(InMemoryIntakeRepository::new());
        intake_repo.seed("p1", "r1", json!({}));
        let now = chrono::Utc::now();
        let row = intake_repo
            .list_unprocessed(10, now)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();

        let bus_a: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let bus_b: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let worker_a = Discover {
            event_store: event_store.clone(),
            projection_repo: projection_repo_a,
            intake_repo: intake_repo.clone(),
            publisher: bus_a,
            config: WorkflowConfig::default(),
        };
        let worker_b = Discover {
            event_store: event_store.clone(),
            projection_repo: projection_repo_b,
            intake_repo: intake_repo.clone(),
            publisher: bus_b,
            config: WorkflowConfig::default(),
        };

        let cancel = CancelSignal::new();
        let (won_a, won_b) = tokio::join!(
            worker_a.discover_one(&row, now, &cancel),
            worker_b.discover_one(&row, now, &cancel),
        );
        // The conditional claim under the intake repo's lock is the real
        // exclusivity guarantee here: exactly one racer's try_claim flips
        // the row and proceeds to append, the other observes it already
        // claimed and returns false without touching the event store.
        let won_a = won_a.unwrap();
        let won_b = won_b.unwrap();
        assert_eq!(
            [won_a, won_b].iter().filter(|w| **w).count(),
            1,
            "exactly one racer must win the claim"
        );

        let request_id = RequestId::new("p1", "r1").unwrap();
        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 1, "exactly one request.discovered.v1 must survive the race");
    }
}
