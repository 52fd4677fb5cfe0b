//! Postgres-backed `EventStore`.
//!
//! One row in `event_streams` per `RequestId` carries the stream's current
//! version as an ETag-style guard; one row in `events` per stored event. A
//! single transaction reads the stream's version, checks it against the
//! caller's expectation, and inserts the new rows — mirroring the
//! teacher repository's optimistic-append-under-transaction shape.
//!
//! ## Error mapping
//!
//! | Postgres code | `EventStoreError` |
//! |---|---|
//! | `23505` unique violation on `(request_id, version)` or `(request_id, id)` | `Concurrency` |
//! | anything else | `Backend` |

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use async_trait::async_trait;
use taskbridge_core::RequestId;
use taskbridge_ports::{EventStore, EventStoreError, ExpectedVersion, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Safe to share across tasks/threads: it only holds a `PgPool`, which is
/// itself a cheap, cloneable connection pool handle.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// DDL for the two tables this adapter owns. Exposed so `taskbridge-service`
    /// can run it at startup in a dev deployment instead of requiring a
    /// separate migration tool.
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS event_streams (
            request_id TEXT PRIMARY KEY,
            version BIGINT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS events (
            request_id TEXT NOT NULL REFERENCES event_streams(request_id),
            version BIGINT NOT NULL,
            id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL,
            correlation_id TEXT,
            causation_id TEXT,
            payload JSONB NOT NULL,
            PRIMARY KEY (request_id, version)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS events_request_id_event_id_idx
            ON events (request_id, id);
    "#;
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, events), fields(request_id = %request_id, event_count = events.len()), err)]
    async fn append(
        &self,
        request_id: &RequestId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EventStoreError::Backend(format!("begin transaction: {e}")))?;

        let current = current_version(&mut tx, request_id).await?;

        // Any event whose id already exists in this stream is an idempotent
        // no-op: surface the already-stored event for republish instead of
        // attempting (and failing) the insert.
        for uncommitted in &events {
            if let Some(existing) = find_by_id_tx(&mut tx, request_id, &uncommitted.id).await? {
                tx.commit()
                    .await
                    .map_err(|e| EventStoreError::Backend(format!("commit: {e}")))?;
                return Ok(vec![existing]);
            }
        }

        if let ExpectedVersion::Exact(expected) = expected_version {
            if expected != current {
                return Err(EventStoreError::Concurrency {
                    expected: ExpectedVersion::Exact(expected),
                    actual: current,
                });
            }
        }

        if current == 0 {
            sqlx::query("INSERT INTO event_streams (request_id, version) VALUES ($1, 0)")
                .bind(request_id.as_canonical())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        let mut next = current + 1;
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events
                    (request_id, version, id, event_type, occurred_at, correlation_id, causation_id, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(request_id.as_canonical())
            .bind(next as i64)
            .bind(&event.id)
            .bind(&event.event_type)
            .bind(event.occurred_at)
            .bind(&event.correlation_id)
            .bind(&event.causation_id)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            stored.push(StoredEvent {
                id: event.id,
                request_id: request_id.clone(),
                version: next,
                event_type: event.event_type,
                occurred_at: event.occurred_at,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                payload: event.payload,
            });
            next += 1;
        }

        sqlx::query("UPDATE event_streams SET version = $2 WHERE request_id = $1")
            .bind(request_id.as_canonical())
            .bind((next - 1) as i64)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit()
            .await
            .map_err(|e| EventStoreError::Backend(format!("commit: {e}")))?;

        Ok(stored)
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn load_stream(&self, request_id: &RequestId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, event_type, occurred_at, correlation_id, causation_id, payload
            FROM events
            WHERE request_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(request_id.as_canonical())
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| event_row_to_stored(row, request_id))
            .collect()
    }

    #[instrument(skip(self), fields(request_id = %request_id, event_id = %event_id), err)]
    async fn find_by_id(
        &self,
        request_id: &RequestId,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, version, event_type, occurred_at, correlation_id, causation_id, payload
            FROM events
            WHERE request_id = $1 AND id = $2
            "#,
        )
        .bind(request_id.as_canonical())
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| event_row_to_stored(&row, request_id)).transpose()
    }
}

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    request_id: &RequestId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query("SELECT version FROM event_streams WHERE request_id = $1 FOR UPDATE")
        .bind(request_id.as_canonical())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

    match row {
        Some(row) => {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| EventStoreError::Backend(format!("read version: {e}")))?;
            Ok(version as u64)
        }
        None => Ok(0),
    }
}

async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    request_id: &RequestId,
    event_id: &str,
) -> Result<Option<StoredEvent>, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, version, event_type, occurred_at, correlation_id, causation_id, payload
        FROM events
        WHERE request_id = $1 AND id = $2
        "#,
    )
    .bind(request_id.as_canonical())
    .bind(event_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    row.map(|row| event_row_to_stored(&row, request_id)).transpose()
}

#[derive(Debug, FromRow)]
struct EventRowFields {
    id: String,
    version: i64,
    event_type: String,
    occurred_at: DateTime<Utc>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    payload: serde_json::Value,
}

fn event_row_to_stored(
    row: &sqlx::postgres::PgRow,
    request_id: &RequestId,
) -> Result<StoredEvent, EventStoreError> {
    let fields = EventRowFields::from_row(row)
        .map_err(|e| EventStoreError::Backend(format!("decode event row: {e}")))?;
    Ok(StoredEvent {
        id: fields.id,
        request_id: request_id.clone(),
        version: fields.version as u64,
        event_type: fields.event_type,
        occurred_at: fields.occurred_at,
        correlation_id: fields.correlation_id,
        causation_id: fields.causation_id,
        payload: fields.payload,
    })
}

fn map_sqlx_error(err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return EventStoreError::Concurrency {
                expected: ExpectedVersion::Any,
                actual: 0,
            };
        }
    }
    EventStoreError::Backend(err.to_string())
}
