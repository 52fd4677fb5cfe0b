//! Postgres-backed `ProjectionRepository`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use taskbridge_core::{RequestId, WorkItemStatus};
use taskbridge_ports::{ProjectionRepoError, ProjectionRepository};
use taskbridge_projection::RequestProjection;

#[derive(Debug, Clone)]
pub struct PostgresProjectionRepository {
    pool: Arc<PgPool>,
}

impl PostgresProjectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS projections (
            request_id TEXT PRIMARY KEY,
            partition_key TEXT NOT NULL,
            row_key TEXT NOT NULL,
            status TEXT NOT NULL,
            submit_attempt_count INTEGER NOT NULL,
            next_poll_at TIMESTAMPTZ,
            external_job_id TEXT,
            last_applied_event_version BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE INDEX IF NOT EXISTS projections_due_for_poll_idx
            ON projections (next_poll_at) WHERE status = 'in_progress';
    "#;
}

#[async_trait]
impl ProjectionRepository for PostgresProjectionRepository {
    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>, ProjectionRepoError> {
        let row = sqlx::query(
            r#"
            SELECT request_id, partition_key, row_key, status, submit_attempt_count,
                   next_poll_at, external_job_id, last_applied_event_version, updated_at
            FROM projections WHERE request_id = $1
            "#,
        )
        .bind(request_id.as_canonical())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| ProjectionRepoError::Backend(e.to_string()))?;

        row.map(row_to_projection).transpose()
    }

    #[instrument(skip(self), fields(request_id = %projection.request_id), err)]
    async fn upsert(&self, projection: RequestProjection) -> Result<(), ProjectionRepoError> {
        sqlx::query(
            r#"
            INSERT INTO projections
                (request_id, partition_key, row_key, status, submit_attempt_count,
                 next_poll_at, external_job_id, last_applied_event_version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (request_id) DO UPDATE SET
                status = EXCLUDED.status,
                submit_attempt_count = EXCLUDED.submit_attempt_count,
                next_poll_at = EXCLUDED.next_poll_at,
                external_job_id = EXCLUDED.external_job_id,
                last_applied_event_version = EXCLUDED.last_applied_event_version,
                updated_at = EXCLUDED.updated_at
            WHERE projections.last_applied_event_version < EXCLUDED.last_applied_event_version
            "#,
        )
        .bind(projection.request_id.as_canonical())
        .bind(&projection.partition_key)
        .bind(&projection.row_key)
        .bind(status_tag(projection.status))
        .bind(projection.submit_attempt_count as i32)
        .bind(projection.next_poll_at)
        .bind(&projection.external_job_id)
        .bind(projection.last_applied_event_version as i64)
        .bind(projection.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| ProjectionRepoError::Backend(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(limit), err)]
    async fn due_for_poll(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RequestProjection>, ProjectionRepoError> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, partition_key, row_key, status, submit_attempt_count,
                   next_poll_at, external_job_id, last_applied_event_version, updated_at
            FROM projections
            WHERE status = 'in_progress' AND next_poll_at IS NOT NULL AND next_poll_at <= $1
            ORDER BY next_poll_at ASC
            LIMIT $2
            "#,
        )
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| ProjectionRepoError::Backend(e.to_string()))?;

        rows.into_iter().map(row_to_projection).collect()
    }
}

fn status_tag(status: WorkItemStatus) -> &'static str {
    match status {
        WorkItemStatus::InProgress => "in_progress",
        WorkItemStatus::Pass => "pass",
        WorkItemStatus::Fail => "fail",
    }
}

fn parse_status_tag(tag: &str) -> Result<WorkItemStatus, ProjectionRepoError> {
    match tag {
        "in_progress" => Ok(WorkItemStatus::InProgress),
        "pass" => Ok(WorkItemStatus::Pass),
        "fail" => Ok(WorkItemStatus::Fail),
        other => Err(ProjectionRepoError::Backend(format!(
            "unrecognized projection status {other:?}"
        ))),
    }
}

#[derive(Debug, FromRow)]
struct ProjectionRow {
    request_id: String,
    partition_key: String,
    row_key: String,
    status: String,
    submit_attempt_count: i32,
    next_poll_at: Option<DateTime<Utc>>,
    external_job_id: Option<String>,
    last_applied_event_version: i64,
    updated_at: DateTime<Utc>,
}

fn row_to_projection(row: sqlx::postgres::PgRow) -> Result<RequestProjection, ProjectionRepoError> {
    let fields = ProjectionRow::from_row(&row)
        .map_err(|e| ProjectionRepoError::Backend(format!("decode projection row: {e}")))?;
    let request_id = fields
        .request_id
        .parse::<RequestId>()
        .map_err(|e| ProjectionRepoError::Backend(format!("invalid request_id in row: {e}")))?;

    Ok(RequestProjection {
        request_id,
        partition_key: fields.partition_key,
        row_key: fields.row_key,
        status: parse_status_tag(&fields.status)?,
        submit_attempt_count: fields.submit_attempt_count as u32,
        next_poll_at: fields.next_poll_at,
        external_job_id: fields.external_job_id,
        last_applied_event_version: fields.last_applied_event_version as u64,
        updated_at: fields.updated_at,
    })
}
