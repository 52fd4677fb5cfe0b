//! CompleteRequest: triggered by `job.terminal.v1`, writes the final intake
//! status and closes the stream.

use std::sync::Arc;

use taskbridge_core::{PollOutcome, RequestId, TerminalStatus};
use taskbridge_domain::AggregateRoot;
use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, IdempotencyStore, IntakeRepository,
    ProjectionRepository, UncommittedEvent, WorkflowConfig,
};

use crate::error::{HandlerError, HandlerResult};
use crate::support::{
    begin_idempotent, complete_idempotent, find_latest, finish_append, publish_stored,
    publisher_source, run_cancellable, LeaseOutcome,
};

pub const HANDLER_NAME: &str = "CompleteRequest";

pub struct CompleteRequest<Es, Pr, Id, Ir> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub idempotency: Arc<Id>,
    pub intake_repo: Arc<Ir>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr, Id, Ir> CompleteRequest<Es, Pr, Id, Ir>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Id: IdempotencyStore,
    Ir: IntakeRepository,
{
    /// React to a `job.terminal.v1` carrying `terminal_status`.
    pub async fn handle(
        &self,
        request_id: &RequestId,
        terminal_status: PollOutcome,
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

            if terminal_status == PollOutcome::FailCanRetry {
                // The Poll handler never emits this; seeing it here means some
                // other producer wrote a terminal event it shouldn't have.
                tracing::warn!(
                    request_id = %request_id,
                    "job.terminal.v1 carried FailCanRetry; coercing to Fail"
                );
            }
            let final_status = terminal_status.to_final();

            if let Some(stored) = find_latest(&stream, "request.completed.v1", |_| true)? {
                let stored = stored.clone();
                self.write_intake_terminal(request_id, final_status).await?;
                crate::support::rebuild_and_save_projection(
                    self.projection_repo.as_ref(),
                    self.config.poll_interval,
                    &stream,
                )
                .await?;
                publish_stored(self.publisher.as_ref(), &publisher_source(HANDLER_NAME), &stored)
                    .await?;
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            self.write_intake_terminal(request_id, final_status).await?;

            let correlation_id = request_id.to_string();
            let status_tag = match final_status {
                TerminalStatus::Pass => "pass",
                TerminalStatus::Fail => "fail",
            };
            let discriminator = format!("final:{status_tag}");
            let event_id = taskbridge_core::create_deterministic(
                &request_id.to_string(),
                "request.completed.v1",
                Some(&correlation_id),
                Some(trigger_event_id),
                Some(&discriminator),
            )?;

            let event = WorkflowEvent::RequestCompleted(taskbridge_events::RequestCompleted {
                request_id: request_id.clone(),
                final_status,
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

    async fn write_intake_terminal(
        &self,
        request_id: &RequestId,
        final_status: TerminalStatus,
    ) -> HandlerResult<()> {
        self.intake_repo
            .mark_terminal(request_id.partition_key(), request_id.row_key(), final_status)
            .await
            .map_err(|e| HandlerError::Port(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskbridge_ports::{EventPublisher, EventStore, ExpectedVersion, UncommittedEvent};
    use taskbridge_testkit::{
        InMemoryEventBus, InMemoryEventStore, InMemoryIdempotencyStore, InMemoryIntakeRepository,
        InMemoryProjectionRepository,
    };

    use super::*;

    async fn seed_terminal(
        event_store: &InMemoryEventStore,
        request_id: &RequestId,
        outcome: PollOutcome,
        now: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let event = WorkflowEvent::JobTerminal(taskbridge_events::JobTerminal {
            request_id: request_id.clone(),
            external_job_id: "fake-job-1".to_string(),
            terminal_status: outcome,
            attempt: 1,
            occurred_at: now,
        });
        let event_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "job.terminal.v1",
            Some(&request_id.to_string()),
            None,
            Some("attempt:1"),
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
    async fn pass_outcome_completes_request_and_marks_intake_row_pass() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let intake_repo = Arc::new(InMemoryIntakeRepository::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());

        let request_id = RequestId::new("p1", "r1").unwrap();
        intake_repo.seed("p1", "r1", serde_json::json!({}));
        let now = chrono::Utc::now();
        let trigger = seed_terminal(&event_store, &request_id, PollOutcome::Pass, now).await;

        let handler = CompleteRequest {
            event_store: event_store.clone(),
            projection_repo,
            idempotency,
            intake_repo: intake_repo.clone(),
            publisher: bus,
            config: WorkflowConfig::default(),
        };

        let cancel = CancelSignal::new();
        handler
            .handle(&request_id, PollOutcome::Pass, &trigger, now, &cancel)
            .await
            .unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.last().unwrap().event_type, "request.completed.v1");
        assert_eq!(
            intake_repo.final_status_of("p1", "r1"),
            Some(TerminalStatus::Pass)
        );
    }

    #[tokio::test]
    async fn redelivery_after_completion_republishes_without_reappending() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let intake_repo = Arc::new(InMemoryIntakeRepository::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());

        let request_id = RequestId::new("p1", "r1").unwrap();
        intake_repo.seed("p1", "r1", serde_json::json!({}));
        let now = chrono::Utc::now();
        let trigger = seed_terminal(&event_store, &request_id, PollOutcome::Fail, now).await;

        let first = CompleteRequest {
            event_store: event_store.clone(),
            projection_repo: projection_repo.clone(),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            intake_repo: intake_repo.clone(),
            publisher: bus.clone(),
            config: WorkflowConfig::default(),
        };
        let cancel = CancelSignal::new();
        first.handle(&request_id, PollOutcome::Fail, &trigger, now, &cancel).await.unwrap();

        // A second worker with no memory of the first's lease redelivers the
        // same trigger.
        let second = CompleteRequest {
            event_store: event_store.clone(),
            projection_repo,
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            intake_repo: intake_repo.clone(),
            publisher: bus,
            config: WorkflowConfig::default(),
        };
        second.handle(&request_id, PollOutcome::Fail, &trigger, now, &cancel).await.unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.len(), 2, "only one request.completed.v1 may ever be appended");
    }
}
