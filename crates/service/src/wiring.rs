//! Generic wiring shared by both backend configurations (in-memory and
//! Postgres): builds the six handlers over whichever adapters `main`
//! chooses, then runs the two timer loops and the bus dispatch loop
//! the service's ambient stack.
//!
//! Kept generic over the storage adapters (`Es`, `Pr`, `Ir`, `Id`, `Ex`)
//! rather than behind `dyn` everywhere, mirroring how the handler structs
//! themselves are generic — `main` monomorphizes this module once per
//! backend rather than paying a vtable indirection on every storage call.
//! The event bus is the one component that is never swapped for a durable
//! backend, so it stays a concrete `InMemoryEventBus` here.

use std::sync::Arc;
use std::time::Duration;

use taskbridge_core::RequestId;
use taskbridge_events::WorkflowEvent;
use taskbridge_handlers::{
    CompleteRequest, Discover, PollExternalJob, PrepareSubmission, ScheduleDuePolls, SubmitJob,
};
use taskbridge_infra::event_bus::InMemoryEventBus;
use taskbridge_ports::{
    CancelSignal, Clock, EventPublisher, EventStore, ExternalServiceClient, IdempotencyStore,
    IntakeRepository, ProjectionRepository, WorkflowConfig,
};

/// The six handlers plus everything the dispatch loop needs to route an
/// event to the right one. One instance is built per process; every field
/// is an `Arc` so loops can be spawned as independent `tokio` tasks that
/// each hold their own clone.
pub struct Workers<Es, Pr, Ir, Id, Ex> {
    pub discover: Arc<Discover<Es, Pr, Ir>>,
    pub prepare: Arc<PrepareSubmission<Es, Pr, Id>>,
    pub submit: Arc<SubmitJob<Es, Pr, Id, Ex>>,
    pub poll: Arc<PollExternalJob<Es, Pr, Id, Ex>>,
    pub complete: Arc<CompleteRequest<Es, Pr, Id, Ir>>,
    pub schedule: Arc<ScheduleDuePolls<Es, Pr>>,
    pub intake_repo: Arc<Ir>,
    pub bus: Arc<InMemoryEventBus>,
    pub config: WorkflowConfig,
}

#[allow(clippy::too_many_arguments)]
pub fn build_workers<Es, Pr, Ir, Id, Ex>(
    event_store: Arc<Es>,
    projection_repo: Arc<Pr>,
    intake_repo: Arc<Ir>,
    idempotency: Arc<Id>,
    external: Arc<Ex>,
    bus: Arc<InMemoryEventBus>,
    config: WorkflowConfig,
) -> Workers<Es, Pr, Ir, Id, Ex>
where
    Es: EventStore + Send + Sync + 'static,
    Pr: ProjectionRepository + Send + Sync + 'static,
    Ir: IntakeRepository + Send + Sync + 'static,
    Id: IdempotencyStore + Send + Sync + 'static,
    Ex: ExternalServiceClient + Send + Sync + 'static,
{
    let publisher: Arc<dyn EventPublisher> = bus.clone();

    let discover = Arc::new(Discover {
        event_store: event_store.clone(),
        projection_repo: projection_repo.clone(),
        intake_repo: intake_repo.clone(),
        publisher: publisher.clone(),
        config: config.clone(),
    });
    let prepare = Arc::new(PrepareSubmission {
        event_store: event_store.clone(),
        projection_repo: projection_repo.clone(),
        idempotency: idempotency.clone(),
        publisher: publisher.clone(),
        config: config.clone(),
    });
    let submit = Arc::new(SubmitJob {
        event_store: event_store.clone(),
        projection_repo: projection_repo.clone(),
        idempotency: idempotency.clone(),
        external: external.clone(),
        publisher: publisher.clone(),
        config: config.clone(),
    });
    let poll = Arc::new(PollExternalJob {
        event_store: event_store.clone(),
        projection_repo: projection_repo.clone(),
        idempotency: idempotency.clone(),
        external,
        publisher: publisher.clone(),
        config: config.clone(),
    });
    let complete = Arc::new(CompleteRequest {
        event_store: event_store.clone(),
        projection_repo: projection_repo.clone(),
        idempotency,
        intake_repo: intake_repo.clone(),
        publisher: publisher.clone(),
        config: config.clone(),
    });
    let schedule = Arc::new(ScheduleDuePolls {
        event_store,
        projection_repo,
        publisher,
        config: config.clone(),
    });

    Workers {
        discover,
        prepare,
        submit,
        poll,
        complete,
        schedule,
        intake_repo,
        bus,
        config,
    }
}

/// Run the Discover timer loop until `cancel` fires.
pub async fn discover_loop<Es, Pr, Ir>(
    discover: Arc<Discover<Es, Pr, Ir>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancelSignal,
) where
    Es: EventStore,
    Pr: ProjectionRepository,
    Ir: IntakeRepository,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match discover.run(clock.now(), &cancel).await {
            Ok(count) if count > 0 => tracing::info!(count, "discover: claimed rows"),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "discover scan failed"),
        }
    }
}

/// Run the ScheduleDuePolls timer loop until `cancel` fires.
pub async fn schedule_due_polls_loop<Es, Pr>(
    schedule: Arc<ScheduleDuePolls<Es, Pr>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancelSignal,
) where
    Es: EventStore,
    Pr: ProjectionRepository,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match schedule.run(clock.now(), &cancel).await {
            Ok(count) if count > 0 => tracing::info!(count, "scheduled due polls"),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "schedule-due-polls scan failed"),
        }
    }
}

/// Subscribe to the bus and route every published envelope to the handler
/// triggered by its event type, until `cancel` fires, realized as a dispatch table instead of a
/// framework-level subscription per event type.
pub async fn dispatch_loop<Es, Pr, Ir, Id, Ex>(
    workers: Arc<Workers<Es, Pr, Ir, Id, Ex>>,
    clock: Arc<dyn Clock>,
    cancel: CancelSignal,
) where
    Es: EventStore,
    Pr: ProjectionRepository,
    Ir: IntakeRepository,
    Id: IdempotencyStore,
    Ex: ExternalServiceClient,
{
    let mut rx = workers.bus.subscribe();
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            received = rx.recv() => received,
        };

        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                // The in-process bus is best-effort: a
                // slow dispatch loop can fall behind and miss envelopes.
                // Nothing downstream is lost permanently — the affected
                // requests simply wait for the next scheduler tick to be
                // re-evaluated via the projection, except for the handful
                // of event types below that have no timer fallback.
                tracing::warn!(skipped, "dispatch loop lagged behind the event bus");
                continue;
            }
        };

        if let Err(err) = dispatch_one(&workers, &envelope, clock.now(), &cancel).await {
            tracing::error!(error = %err, event_id = envelope.id(), "handler failed");
        }
    }
}

async fn dispatch_one<Es, Pr, Ir, Id, Ex>(
    workers: &Workers<Es, Pr, Ir, Id, Ex>,
    envelope: &taskbridge_infra::event_bus::Published,
    now: chrono::DateTime<chrono::Utc>,
    cancel: &CancelSignal,
) -> taskbridge_handlers::HandlerResult<()>
where
    Es: EventStore,
    Pr: ProjectionRepository,
    Ir: IntakeRepository,
    Id: IdempotencyStore,
    Ex: ExternalServiceClient,
{
    let event: WorkflowEvent = match serde_json::from_value(envelope.data().clone()) {
        Ok(event) => event,
        Err(err) => {
            // Malformed payload: treated as a discarded
            // validation failure, not a fatal error, at the handler level.
            // At the dispatch boundary (before any handler/idempotency
            // record exists to mark complete) the only correct response is
            // to log and drop it.
            tracing::warn!(error = %err, event_id = envelope.id(), "dropping envelope with undecodable payload");
            return Ok(());
        }
    };

    match event {
        WorkflowEvent::RequestDiscovered(e) => {
            workers
                .prepare
                .handle(&e.request_id, envelope.id(), now, cancel)
                .await
        }
        WorkflowEvent::SubmissionPrepared(e) => {
            let payload = intake_payload_for(workers.intake_repo.as_ref(), &e.request_id)
                .await
                .map_err(|err| taskbridge_handlers::HandlerError::Port(err.into()))?;
            workers
                .submit
                .handle(&e.request_id, e.attempt, envelope.id(), &payload, now, cancel)
                .await
        }
        WorkflowEvent::JobPollRequested(e) => {
            workers
                .poll
                .handle(&e.request_id, &e.external_job_id, envelope.id(), now, cancel)
                .await
        }
        WorkflowEvent::JobTerminal(e) => {
            workers
                .complete
                .handle(&e.request_id, e.terminal_status, envelope.id(), now, cancel)
                .await
        }
        // `job.submitted.v1` has no reactive handler — the next poll is
        // timer-driven off the projection's `next_poll_at`, not this event.
        // `request.completed.v1` is the terminal fact of the chain; nothing
        // reacts to it inside this process.
        WorkflowEvent::JobSubmitted(_) | WorkflowEvent::RequestCompleted(_) => Ok(()),
    }
}

async fn intake_payload_for<Ir: IntakeRepository>(
    intake_repo: &Ir,
    request_id: &RequestId,
) -> Result<serde_json::Value, taskbridge_ports::IntakeError> {
    let row = intake_repo
        .get(request_id.partition_key(), request_id.row_key())
        .await?;
    Ok(row.map(|row| row.payload).unwrap_or(serde_json::Value::Null))
}
