//! SubmitJob: triggered by `submission.prepared.v1`, calls the external
//! service and records its job id.

use std::sync::Arc;

use taskbridge_core::RequestId;
use taskbridge_domain::AggregateRoot;
use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, ExternalServiceClient,
    IdempotencyStore, ProjectionRepository, UncommittedEvent, WorkflowConfig,
};

use crate::error::{HandlerError, HandlerResult};
use crate::support::{
    begin_idempotent, complete_idempotent, find_latest, finish_append, publish_stored,
    publisher_source, run_cancellable, LeaseOutcome,
};

pub const HANDLER_NAME: &str = "SubmitJob";

pub struct SubmitJob<Es, Pr, Id, Ex> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub idempotency: Arc<Id>,
    pub external: Arc<Ex>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr, Id, Ex> SubmitJob<Es, Pr, Id, Ex>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Id: IdempotencyStore,
    Ex: ExternalServiceClient,
{
    /// React to a `submission.prepared.v1` with the given `attempt`.
    pub async fn handle(
        &self,
        request_id: &RequestId,
        attempt: u32,
        trigger_event_id: &str,
        payload: &serde_json::Value,
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

            if aggregate.is_terminal() || attempt == 0 || attempt > self.config.max_submit_attempts {
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            if aggregate.has_submitted(attempt) {
                if let Some(stored) = find_latest(&stream, "job.submitted.v1", |event| {
                    matches!(event, WorkflowEvent::JobSubmitted(e) if e.attempt == attempt)
                })? {
                    let stored = stored.clone();
                    crate::support::rebuild_and_save_projection(
                        self.projection_repo.as_ref(),
                        self.config.poll_interval,
                        &stream,
                    )
                    .await?;
                    publish_stored(self.publisher.as_ref(), &publisher_source(HANDLER_NAME), &stored)
                        .await?;
                }
                return complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id)
                    .await;
            }

            // Call the external service before appending: it must be
            // idempotent on (requestId, attempt), so a crash between this
            // call and the append is safe — the retry gets the same jobId.
            let external_job_id = self
                .external
                .submit(request_id, attempt, payload)
                .await
                .map_err(|e| HandlerError::Port(e.into()))?;

            let correlation_id = request_id.to_string();
            let discriminator = format!("attempt:{attempt}");
            let event_id = taskbridge_core::create_deterministic(
                &request_id.to_string(),
                "job.submitted.v1",
                Some(&correlation_id),
                Some(trigger_event_id),
                Some(&discriminator),
            )?;

            let event = WorkflowEvent::JobSubmitted(taskbridge_events::JobSubmitted {
                request_id: request_id.clone(),
                partition_key: request_id.partition_key().to_string(),
                row_key: request_id.row_key().to_string(),
                external_job_id,
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
