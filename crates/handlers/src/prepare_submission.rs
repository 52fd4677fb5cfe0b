//! PrepareSubmission: triggered by `request.discovered.v1` (and any later
//! retry cycle), decides the next submission attempt.

use std::sync::Arc;

use taskbridge_core::RequestId;
use taskbridge_domain::AggregateRoot;
use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, IdempotencyStore,
    ProjectionRepository, UncommittedEvent, WorkflowConfig,
};

use crate::error::{HandlerError, HandlerResult};
use crate::support::{
    begin_idempotent, complete_idempotent, find_latest, finish_append, publish_stored,
    publisher_source, run_cancellable, LeaseOutcome,
};

pub const HANDLER_NAME: &str = "PrepareSubmission";

pub struct PrepareSubmission<Es, Pr, Id> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub idempotency: Arc<Id>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr, Id> PrepareSubmission<Es, Pr, Id>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Id: IdempotencyStore,
{
    /// React to a `request.discovered.v1` (triggering event id
    /// `trigger_event_id`) for `request_id`.
    pub async fn handle(
        &self,
        request_id: &RequestId,
        trigger_event_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        cancel: &CancelSignal,
    ) -> HandlerResult<()> {
        run_cancellable(cancel, async {
            match begin_idempotent(
                self.idempotency.as_ref(),
                HANDLER_NAME,
                trigger_event_id,
                self.config.idempotency_lease_duration,
                now,
            )
            .await?
            {
                LeaseOutcome::AlreadyCompleted | LeaseOutcome::LeaseHeld => return Ok(()),
                LeaseOutcome::Proceed => {}
            }

            let (stream, aggregate) =
                crate::support::load_and_rehydrate(self.event_store.as_ref(), request_id).await?;

            if aggregate.is_terminal() {
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            let attempt = aggregate.submit_attempt_count() + 1;
            if attempt > self.config.max_submit_attempts {
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            if aggregate.has_prepared(attempt) {
                if let Some(stored) = find_latest(&stream, "submission.prepared.v1", |event| {
                    matches!(event, WorkflowEvent::SubmissionPrepared(e) if e.attempt == attempt)
                })? {
                    let full_stream = stream.clone();
                    let stored = stored.clone();
                    crate::support::rebuild_and_save_projection(
                        self.projection_repo.as_ref(),
                        self.config.poll_interval,
                        &full_stream,
                    )
                    .await?;
                    publish_stored(self.publisher.as_ref(), &publisher_source(HANDLER_NAME), &stored)
                        .await?;
                }
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            let correlation_id = request_id.to_string();
            let discriminator = format!("attempt:{attempt}");
            let event_id = taskbridge_core::create_deterministic(
                &request_id.to_string(),
                "submission.prepared.v1",
                Some(&correlation_id),
                Some(trigger_event_id),
                Some(&discriminator),
            )?;

            let event = WorkflowEvent::SubmissionPrepared(taskbridge_events::SubmissionPrepared {
                request_id: request_id.clone(),
                partition_key: request_id.partition_key().to_string(),
                row_key: request_id.row_key().to_string(),
                attempt,
                occurred_at: now,
            });
            let uncommitted = UncommittedEvent::from_typed(
                event_id,
                &event,
                Some(correlation_id),
                Some(trigger_event_id.to_string()),
            )
            .map_err(|e| HandlerError::Port(e.into()))?;

            let stored = match self
                .event_store
                .append(
                    request_id,
                    vec![uncommitted],
                    ExpectedVersion::Exact(aggregate.version()),
                )
                .await
            {
                Ok(stored) => stored,
                Err(taskbridge_ports::EventStoreError::Concurrency { .. }) => {
                    return complete_idempotent(
                        self.idempotency.as_ref(),
                        HANDLER_NAME,
                        trigger_event_id,
                    )
                    .await;
                }
                Err(e) => return Err(HandlerError::Port(e.into())),
            };

            let full_stream = self
                .event_store
                .load_stream(request_id)
                .await
                .map_err(|e| HandlerError::Port(e.into()))?;
            finish_append(
                self.projection_repo.as_ref(),
                self.publisher.as_ref(),
                &publisher_source(HANDLER_NAME),
                self.config.poll_interval,
                &full_stream,
                &stored,
            )
            .await?;

            complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskbridge_ports::{EventPublisher, EventStore, ExpectedVersion, UncommittedEvent};
    use taskbridge_testkit::{
        InMemoryEventBus, InMemoryEventStore, InMemoryIdempotencyStore, InMemoryProjectionRepository,
    };

    use super::*;

    fn handler() -> (
        PrepareSubmission<InMemoryEventStore, InMemoryProjectionRepository, InMemoryIdempotencyStore>,
        Arc<InMemoryEventStore>,
    ) {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let handler = PrepareSubmission {
            event_store: event_store.clone(),
            projection_repo,
            idempotency,
            publisher: bus,
            config: WorkflowConfig::default(),
        };
        (handler, event_store)
    }

    async fn discover(event_store: &InMemoryEventStore, request_id: &RequestId, now: chrono::DateTime<chrono::Utc>) -> String {
        let event = WorkflowEvent::RequestDiscovered(taskbridge_events::RequestDiscovered {
            request_id: request_id.clone(),
            partition_key: request_id.partition_key().to_string(),
            row_key: request_id.row_key().to_string(),
            occurred_at: now,
        });
        let event_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "request.discovered.v1",
            Some(&request_id.to_string()),
            None,
            None,
        )
        .unwrap();
        let uncommitted =
            UncommittedEvent::from_typed(event_id.clone(), &event, Some(request_id.to_string()), None).unwrap();
        event_store
            .append(request_id, vec![uncommitted], ExpectedVersion::Exact(0))
            .await
            .unwrap();
        event_id
    }

    #[tokio::test]
    async fn first_prepare_appends_attempt_one() {
        let (handler, event_store) = handler();
        let request_id = RequestId::new("p1", "r1").unwrap();
        let now = chrono::Utc::now();
        let trigger = discover(&event_store, &request_id, now).await;

        let cancel = CancelSignal::new();
        handler.handle(&request_id, &trigger, now, &cancel).await.unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[1].event_type, "submission.prepared.v1");
    }

    #[tokio::test]
    async fn a_worker_that_lost_its_idempotency_state_republishes_instead_of_reappending() {
        // Simulates a crash between append and lease-completion: a second
        // worker with no memory of the first's lease still must not double
        // the attempt — `has_prepared` plus `find_latest` catches it.
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());
        let request_id = RequestId::new("p1", "r1").unwrap();
        let now = chrono::Utc::now();
        let trigger = discover(&event_store, &request_id, now).await;

        let first = PrepareSubmission {
            event_store: event_store.clone(),
            projection_repo: projection_repo.clone(),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            publisher: bus.clone(),
            config: WorkflowConfig::default(),
        };
        let cancel = CancelSignal::new();
        first.handle(&request_id, &trigger, now, &cancel).await.unwrap();

        let second = PrepareSubmission {
            event_store: event_store.clone(),
            projection_repo,
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            publisher: bus,
            config: WorkflowConfig::default(),
        };
        second.handle(&request_id, &trigger, now, &cancel).await.unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 2, "second worker must not append a duplicate attempt");
    }
}
