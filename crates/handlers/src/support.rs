//! Shared machinery every handler uses: cancellable awaits, stream loading
//! and rehydration, projection rebuild-and-save, and republishing a
//! previously-stored event by its deterministic id.

use std::future::Future;
use std::time::Duration;

use taskbridge_core::RequestId;
use taskbridge_domain::{rehydrate, Aggregate};
use taskbridge_events::{EventEnvelope, WorkflowEvent};
use taskbridge_ports::{
    CancelSignal, EventPublisher, EventStore, IdempotencyStore, ProjectionRepository, StoredEvent,
};

use crate::error::{HandlerError, HandlerResult};

/// Outcome of the idempotency-begin step.
pub enum LeaseOutcome {
    /// No completed or live lease existed; the caller owns the lease now and
    /// should proceed with the handler's work.
    Proceed,
    /// Another worker already finished this (handler, event) pair. Silent
    /// skip.
    AlreadyCompleted,
    /// Another worker currently holds an unexpired lease. Silent skip; the
    /// bus will redeliver and a later attempt will see it expired or
    /// completed.
    LeaseHeld,
}

/// Attempt to begin idempotent processing of `event_id` for `handler_name`.
pub async fn begin_idempotent(
    store: &dyn IdempotencyStore,
    handler_name: &str,
    event_id: &str,
    lease_duration: Duration,
    now: chrono::DateTime<chrono::Utc>,
) -> HandlerResult<LeaseOutcome> {
    match store
        .try_acquire(
            handler_name,
            event_id,
            chrono::Duration::from_std(lease_duration).unwrap_or_default(),
            now,
        )
        .await
    {
        Ok(record) if record.completed => Ok(LeaseOutcome::AlreadyCompleted),
        Ok(_) => Ok(LeaseOutcome::Proceed),
        Err(taskbridge_ports::IdempotencyError::AlreadyLeased { .. }) => Ok(LeaseOutcome::LeaseHeld),
        Err(e) => Err(HandlerError::Port(e.into())),
    }
}

/// Mark a lease completed. Failure here is re-raised: a duplicate
/// publish that can result from retrying this step is acceptable because
/// subscribers are idempotent on deterministic event ids.
pub async fn complete_idempotent(
    store: &dyn IdempotencyStore,
    handler_name: &str,
    event_id: &str,
) -> HandlerResult<()> {
    store
        .complete(handler_name, event_id)
        .await
        .map_err(|e| HandlerError::Port(e.into()))
}

/// The identity a handler publishes under. Kept as a free function rather
/// than a constant so future handlers can namespace differently without
/// touching the others.
pub fn publisher_source(handler_name: &str) -> String {
    format!("taskbridge/handlers/{handler_name}")
}

/// Race `fut` against `cancel`; every suspension point in a handler should
/// be wrapped in this rather than awaited bare, so a cancellation is honored
/// before the next I/O rather than only at the next `.await` that happens to
/// check it.
pub async fn run_cancellable<F, T>(cancel: &CancelSignal, fut: F) -> HandlerResult<T>
where
    F: Future<Output = HandlerResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HandlerError::Cancelled),
        result = fut => result,
    }
}

/// Load a request's full stream and fold it into an `Aggregate`.
pub async fn load_and_rehydrate(
    store: &dyn EventStore,
    request_id: &RequestId,
) -> HandlerResult<(Vec<StoredEvent>, Aggregate)> {
    let stream = store
        .load_stream(request_id)
        .await
        .map_err(|e| HandlerError::Port(e.into()))?;

    let mut decoded = Vec::with_capacity(stream.len());
    for stored in &stream {
        let event = stored
            .to_typed()
            .map_err(|e| HandlerError::Deserialize(e.to_string()))?;
        decoded.push((stored.version, event));
    }

    let aggregate = rehydrate(request_id, &decoded);
    Ok((stream, aggregate))
}

/// Decode every stored event's payload, pairing it with its stream version.
pub fn decode_stream(stream: &[StoredEvent]) -> HandlerResult<Vec<(u64, WorkflowEvent)>> {
    stream
        .iter()
        .map(|stored| {
            stored
                .to_typed()
                .map(|event| (stored.version, event))
                .map_err(|e| HandlerError::Deserialize(e.to_string()))
        })
        .collect()
}

/// Rebuild the `RequestProjection` from the full stream and upsert it. Used
/// after every successful append: simplest-correct over incremental, since
/// a request's history is small and bounded by `maxSubmitAttempts`.
pub async fn rebuild_and_save_projection(
    repo: &dyn ProjectionRepository,
    poll_interval: Duration,
    stream: &[StoredEvent],
) -> HandlerResult<()> {
    let decoded = decode_stream(stream)?;
    let mut projection = None;
    for (version, event) in &decoded {
        projection = Some(taskbridge_projection::reduce(
            projection.as_ref(),
            *version,
            event,
            poll_interval,
        ));
    }
    if let Some(projection) = projection {
        repo.upsert(projection)
            .await
            .map_err(|e| HandlerError::Port(e.into()))?;
    }
    Ok(())
}

/// Publish a stored event, wrapping it in the wire envelope.
pub async fn publish_stored(
    publisher: &dyn EventPublisher,
    source: &str,
    stored: &StoredEvent,
) -> HandlerResult<()> {
    let envelope = EventEnvelope::new(
        stored.id.clone(),
        stored.event_type.clone(),
        source,
        &stored.request_id,
        stored.occurred_at,
        stored.correlation_id.clone(),
        stored.causation_id.clone(),
        stored.payload.clone(),
    );
    publisher
        .publish(envelope)
        .await
        .map_err(|e| HandlerError::Port(e.into()))
}

/// Find the most-recently-stored event of a given type matching `matches`,
/// e.g. the `submission.prepared.v1` for a specific attempt — used by every
/// handler's "already did this, republish instead of redo" branch.
pub fn find_latest<'a>(
    stream: &'a [StoredEvent],
    event_type: &str,
    matches: impl Fn(&WorkflowEvent) -> bool,
) -> HandlerResult<Option<&'a StoredEvent>> {
    for stored in stream.iter().rev() {
        if stored.event_type != event_type {
            continue;
        }
        let decoded = stored
            .to_typed()
            .map_err(|e| HandlerError::Deserialize(e.to_string()))?;
        if matches(&decoded) {
            return Ok(Some(stored));
        }
    }
    Ok(None)
}

/// Common epilogue after a successful append: rebuild+save the projection,
/// then publish every newly-stored event (in practice always exactly one,
/// but written to accept a batch for symmetry with `EventStore::append`).
pub async fn finish_append(
    repo: &dyn ProjectionRepository,
    publisher: &dyn EventPublisher,
    source: &str,
    poll_interval: Duration,
    full_stream: &[StoredEvent],
    newly_stored: &[StoredEvent],
) -> HandlerResult<()> {
    rebuild_and_save_projection(repo, poll_interval, full_stream).await?;
    for stored in newly_stored {
        publish_stored(publisher, source, stored).await?;
    }
    Ok(())
}
