//! PollExternalJob: triggered by `job.pollrequested.v1`, checks external
//! status and decides whether the request is terminal or gets another
//! attempt.

use std::sync::Arc;

use taskbridge_core::{PollOutcome, RequestId};
use taskbridge_domain::AggregateRoot;
use taskbridge_events::WorkflowEvent;
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, ExpectedVersion, ExternalJobStatus,
    ExternalServiceClient, IdempotencyStore, ProjectionRepository, UncommittedEvent,
    WorkflowConfig,
};

use crate::error::{HandlerError, HandlerResult};
use crate::support::{
    begin_idempotent, complete_idempotent, find_latest, finish_append, publish_stored,
    publisher_source, run_cancellable, LeaseOutcome,
};

pub const HANDLER_NAME: &str = "PollExternalJob";

pub struct PollExternalJob<Es, Pr, Id, Ex> {
    pub event_store: Arc<Es>,
    pub projection_repo: Arc<Pr>,
    pub idempotency: Arc<Id>,
    pub external: Arc<Ex>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: WorkflowConfig,
}

impl<Es, Pr, Id, Ex> PollExternalJob<Es, Pr, Id, Ex>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Id: IdempotencyStore,
    Ex: ExternalServiceClient,
{
    /// React to a `job.pollrequested.v1` for `external_job_id`.
    pub async fn handle(
        &self,
        request_id: &RequestId,
        external_job_id: &str,
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

            if let Some(stored) = find_latest(&stream, "job.terminal.v1", |_| true)? {
                let stored = stored.clone();
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

            let status = self
                .external
                .poll(external_job_id)
                .await
                .map_err(|e| HandlerError::Port(e.into()))?;

            let attempt = aggregate.submit_attempt_count().max(1);

            match status {
                ExternalJobStatus::InProgress => {
                    // ScheduleDuePolls already advanced nextPollAtUtc; nothing to append.
                }
                ExternalJobStatus::Pass | ExternalJobStatus::Fail => {
                    let outcome = status.to_poll_outcome().expect("mapped above");
                    self.append_terminal(
                        request_id,
                        &aggregate,
                        external_job_id,
                        outcome,
                        attempt,
                        trigger_event_id,
                        now,
                    )
                    .await?;
                }
                ExternalJobStatus::FailCanRetry => {
                    self.handle_fail_can_retry(
                        request_id,
                        &stream,
                        &aggregate,
                        external_job_id,
                        attempt,
                        trigger_event_id,
                        now,
                    )
                    .await?;
                }
            }

            complete_idempotent(self.idempotency.as_ref(), HANDLER_NAME, trigger_event_id).await
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_terminal(
        &self,
        request_id: &RequestId,
        aggregate: &taskbridge_domain::Aggregate,
        external_job_id: &str,
        outcome: PollOutcome,
        attempt: u32,
        trigger_event_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> HandlerResult<()> {
        let correlation_id = request_id.to_string();
        let status_tag = match outcome {
            PollOutcome::Pass => "pass",
            PollOutcome::Fail => "fail",
            PollOutcome::FailCanRetry => "fail_can_retry",
        };
        let discriminator = format!("attempt:{attempt}|job:{external_job_id}|status:{status_tag}");
        let event_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "job.terminal.v1",
            Some(&correlation_id),
            Some(trigger_event_id),
            Some(&discriminator),
        )?;

        let event = WorkflowEvent::JobTerminal(taskbridge_events::JobTerminal {
            request_id: request_id.clone(),
            external_job_id: external_job_id.to_string(),
            terminal_status: outcome,
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
            Err(taskbridge_ports::EventStoreError::Concurrency { .. }) => return Ok(()),
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
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_fail_can_retry(
        &self,
        request_id: &RequestId,
        stream: &[taskbridge_ports::StoredEvent],
        aggregate: &taskbridge_domain::Aggregate,
        external_job_id: &str,
        attempt: u32,
        trigger_event_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> HandlerResult<()> {
        let next_attempt = aggregate.submit_attempt_count() + 1;
        if next_attempt > self.config.max_submit_attempts {
            return self
                .append_terminal(
                    request_id,
                    aggregate,
                    external_job_id,
                    PollOutcome::Fail,
                    attempt,
                    trigger_event_id,
                    now,
                )
                .await;
        }

        if aggregate.has_prepared(next_attempt) {
            if let Some(stored) = find_latest(stream, "submission.prepared.v1", |event| {
                matches!(event, WorkflowEvent::SubmissionPrepared(e) if e.attempt == next_attempt)
            })? {
                let stored = stored.clone();
                crate::support::rebuild_and_save_projection(
                    self.projection_repo.as_ref(),
                    self.config.poll_interval,
                    stream,
                )
                .await?;
                publish_stored(self.publisher.as_ref(), &publisher_source(HANDLER_NAME), &stored)
                    .await?;
            }
            return Ok(());
        }

        let correlation_id = request_id.to_string();
        let discriminator = format!("attempt:{next_attempt}");
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
            attempt: next_attempt,
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
            Err(taskbridge_ports::EventStoreError::Concurrency { .. }) => return Ok(()),
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
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskbridge_ports::{EventPublisher, EventStore, ExpectedVersion, UncommittedEvent};
    use taskbridge_testkit::{
        FakeExternalServiceClient, InMemoryEventBus, InMemoryEventStore, InMemoryIdempotencyStore,
        InMemoryProjectionRepository,
    };

    use super::*;

    async fn seed_submitted(
        event_store: &InMemoryEventStore,
        request_id: &RequestId,
        attempt: u32,
        external_job_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let prepared = WorkflowEvent::SubmissionPrepared(taskbridge_events::SubmissionPrepared {
            request_id: request_id.clone(),
            partition_key: request_id.partition_key().to_string(),
            row_key: request_id.row_key().to_string(),
            attempt,
            occurred_at: now,
        });
        let prepared_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "submission.prepared.v1",
            Some(&request_id.to_string()),
            None,
            Some(&format!("attempt:{attempt}")),
        )
        .unwrap();
        let uncommitted =
            UncommittedEvent::from_typed(prepared_id, &prepared, Some(request_id.to_string()), None).unwrap();
        event_store
            .append(request_id, vec![uncommitted], ExpectedVersion::Exact(0))
            .await
            .unwrap();

        let submitted = WorkflowEvent::JobSubmitted(taskbridge_events::JobSubmitted {
            request_id: request_id.clone(),
            partition_key: request_id.partition_key().to_string(),
            row_key: request_id.row_key().to_string(),
            external_job_id: external_job_id.to_string(),
            attempt,
            occurred_at: now,
        });
        let submitted_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "job.submitted.v1",
            Some(&request_id.to_string()),
            None,
            Some(&format!("attempt:{attempt}")),
        )
        .unwrap();
        let uncommitted =
            UncommittedEvent::from_typed(submitted_id, &submitted, Some(request_id.to_string()), None).unwrap();
        event_store
            .append(request_id, vec![uncommitted], ExpectedVersion::Exact(1))
            .await
            .unwrap();

        let poll_requested = WorkflowEvent::JobPollRequested(taskbridge_events::JobPollRequested {
            request_id: request_id.clone(),
            external_job_id: external_job_id.to_string(),
            attempt,
            occurred_at: now,
        });
        let poll_id = taskbridge_core::create_deterministic(
            &request_id.to_string(),
            "job.pollrequested.v1",
            Some(&request_id.to_string()),
            None,
            Some(&format!("attempt:{attempt}|seq:1")),
        )
        .unwrap();
        let uncommitted =
            UncommittedEvent::from_typed(poll_id.clone(), &poll_requested, Some(request_id.to_string()), None)
                .unwrap();
        event_store
            .append(request_id, vec![uncommitted], ExpectedVersion::Exact(2))
            .await
            .unwrap();

        poll_id
    }

    #[tokio::test]
    async fn pass_status_appends_job_terminal() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let external = Arc::new(FakeExternalServiceClient::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());

        let request_id = RequestId::new("p1", "r1").unwrap();
        let now = chrono::Utc::now();
        let trigger = seed_submitted(&event_store, &request_id, 1, "fake-job-1", now).await;
        external.script_poll("fake-job-1", vec![ExternalJobStatus::Pass]);

        let handler = PollExternalJob {
            event_store: event_store.clone(),
            projection_repo,
            idempotency,
            external,
            publisher: bus,
            config: WorkflowConfig::default(),
        };

        let cancel = CancelSignal::new();
        handler
            .handle(&request_id, "fake-job-1", &trigger, now, &cancel)
            .await
            .unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.last().unwrap().event_type, "job.terminal.v1");
    }

    #[tokio::test]
    async fn fail_can_retry_within_budget_prepares_next_attempt() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let external = Arc::new(FakeExternalServiceClient::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());

        let request_id = RequestId::new("p1", "r1").unwrap();
        let now = chrono::Utc::now();
        let trigger = seed_submitted(&event_store, &request_id, 1, "fake-job-1", now).await;
        external.script_poll("fake-job-1", vec![ExternalJobStatus::FailCanRetry]);

        let mut config = WorkflowConfig::default();
        config.max_submit_attempts = 3;
        let handler = PollExternalJob {
            event_store: event_store.clone(),
            projection_repo,
            idempotency,
            external,
            publisher: bus,
            config,
        };

        let cancel = CancelSignal::new();
        handler
            .handle(&request_id, "fake-job-1", &trigger, now, &cancel)
            .await
            .unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        assert_eq!(stream.last().unwrap().event_type, "submission.prepared.v1");
    }

    #[tokio::test]
    async fn fail_can_retry_past_budget_is_coerced_to_fail() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let projection_repo = Arc::new(InMemoryProjectionRepository::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let external = Arc::new(FakeExternalServiceClient::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(InMemoryEventBus::default());

        let request_id = RequestId::new("p1", "r1").unwrap();
        let now = chrono::Utc::now();
        let trigger = seed_submitted(&event_store, &request_id, 1, "fake-job-1", now).await;
        external.script_poll("fake-job-1", vec![ExternalJobStatus::FailCanRetry]);

        let mut config = WorkflowConfig::default();
        config.max_submit_attempts = 1;
        let handler = PollExternalJob {
            event_store: event_store.clone(),
            projection_repo,
            idempotency,
            external,
            publisher: bus,
            config,
        };

        let cancel = CancelSignal::new();
        handler
            .handle(&request_id, "fake-job-1", &trigger, now, &cancel)
            .await
            .unwrap();

        let stream = event_store.load_stream(&request_id).await.unwrap();
        let last = stream.last().unwrap();
        assert_eq!(last.event_type, "job.terminal.v1");
        match last.to_typed().unwrap() {
            WorkflowEvent::JobTerminal(e) => assert_eq!(e.terminal_status, PollOutcome::Fail),
            other => panic!("expected JobTerminal, got {other:?}"),
        }
    }
}
