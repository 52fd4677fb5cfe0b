//! ScheduleDuePolls: the timer-driven handler that dispatches
//! `job.pollrequested.v1` for every request whose poll interval has elapsed
//! for items due to be polled.

use std::sync::Arc;

use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, ProjectionRepository,
    UncommittedEvent, WorkflowConfig,
};

use crate::error::{HandlerError, HandlerResult};
use crate::support::{finish_append, publisher_source, run_cancellable};

pub const HANDLER_NAME: &str = "ScheduleDuePolls";

pub struct ScheduleDuePolls<Es, Pr> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr> ScheduleDuePolls<Es, Pr>
where
    Es: EventStore,
    Pr: ProjectionRepository,
{
    pub async fn run(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        cancel: &CancelSignal,
    ) -> HandlerResult<usize> {
        let due = self
            .projection_repo
            .due_for_poll(now, self.config.poll_batch_size)
            .await
            .map_err(|e| HandlerError::Port(e.into()))?;

        let mut dispatched = 0usize;
        for projection in due {
            if cancel.is_cancelled() {
                break;
            }
            if self.schedule_one(&projection, now, cancel).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn schedule_one(
        &self,
        projection: &taskbridge_projection::RequestProjection,
        now: chrono::DateTime<chrono::Utc>,
        cancel: &CancelSignal,
    ) -> HandlerResult<bool> {
        run_cancellable(cancel, async {
            let (external_job_id, attempt) = match (
                projection.external_job_id.clone(),
                projection.submit_attempt_count,
            ) {
                (Some(job_id), attempt) if attempt > 0 => (job_id, attempt),
                _ => return Ok(false),
            };

            let request_id = &projection.request_id;
            let due_at = projection
                .next_poll_at
                .unwrap_or(now)
                .to_rfc3339();
            let correlation_id = request_id.to_string();
            let discriminator = format!("attempt:{attempt}|due:{due_at}");
            let event_id = taskbridge_core::create_deterministic(
                &request_id.to_string(),
                "job.pollrequested.v1",
                Some(&correlation_id),
                None,
                Some(&discriminator),
            )?;

            let event = WorkflowEvent::JobPollRequested(taskbridge_events::JobPollRequested {
                request_id: request_id.clone(),
                external_job_id: external_job_id.clone(),
                attempt,
                occurred_at: now,
            });
            let uncommitted = UncommittedEvent::from_typed(event_id, &event, Some(correlation_id), None)
                .map_err(|e| HandlerError::Port(e.into()))?;

            let stored = match self
                .event_store
                .append(
                    request_id,
                    vec![uncommitted],
                    ExpectedVersion::Exact(projection.last_applied_event_version),
                )
                .await
            {
                Ok(stored) => stored,
                Err(taskbridge_ports::EventStoreError::Concurrency { .. }) => return Ok(false),
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

            Ok(true)
        })
        .await
    }
}
