//! `taskbridge-external-stub`: a small axum service that stands in for the
//! real external job-processing service during local manual testing and the
//! HTTP adapter's integration tests.
//!
//! Exposes `POST /jobs` and `GET /jobs/{id}` over the same wire contract the
//! `HttpExternalServiceClient` adapter speaks. State is in-memory and the
//! status returned by `GET /jobs/{id}` is a deterministic function of how
//! many times that job has been polled before, not wall-clock time or
//! randomness — so a manual test run is reproducible run to run.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbridge_observability::init();

    let bind_addr = std::env::var("WF_EXTERNAL_STUB_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8089".to_string());

    let state = AppState::default();
    let app = Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:id", get(get_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "external-service stub listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Default, Clone)]
struct AppState {
    inner: std::sync::Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_job_seq: AtomicU64,
    /// `(requestId, attempt) -> jobId`, so a retried `createJob` for the
    /// same attempt (same idempotency contract the core relies on) returns
    /// the job it already created, while a later attempt for the same
    /// request gets its own job id.
    jobs_by_request: Mutex<HashMap<(String, u32), String>>,
    /// `jobId -> poll count`, driving the deterministic status progression.
    poll_counts: Mutex<HashMap<String, u32>>,
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    request_id: String,
    attempt: u32,
    #[allow(dead_code)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    status: WireStatus,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum WireStatus {
    Created,
    InProgress,
    Pass,
    Fail,
    FailCanRetry,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Json<CreateJobResponse> {
    let mut jobs = state.inner.jobs_by_request.lock().expect("lock poisoned");
    let key = (req.request_id, req.attempt);
    if let Some(existing) = jobs.get(&key) {
        return Json(CreateJobResponse {
            job_id: existing.clone(),
        });
    }
    let seq = state.inner.next_job_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let job_id = format!("stub-job-{seq}");
    jobs.insert(key, job_id.clone());
    Json(CreateJobResponse { job_id })
}

async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, Response> {
    let known = state
        .inner
        .jobs_by_request
        .lock()
        .expect("lock poisoned")
        .values()
        .any(|id| id == &job_id);
    if !known {
        return Err((StatusCode::NOT_FOUND, format!("unknown job {job_id}")).into_response());
    }

    let mut counts = state.inner.poll_counts.lock().expect("lock poisoned");
    let count = counts.entry(job_id.clone()).or_insert(0);
    *count += 1;

    // Deterministic progression: Created on the first poll, in progress on
    // the second, then a terminal outcome derived from the job id so a
    // manual test run can pick outcomes by choosing job-id suffixes.
    let status = match *count {
        1 => WireStatus::Created,
        2 => WireStatus::InProgress,
        _ => terminal_for(&job_id),
    };

    Ok(Json(JobStatusResponse { status }))
}

/// Picks an outcome from the job id's sequence number so the stub's
/// behavior is reproducible without any external randomness source: one in
/// five jobs reports `FailCanRetry` on every poll from the third onward, one
/// in five reports `Fail`, the rest report `Pass`.
fn terminal_for(job_id: &str) -> WireStatus {
    let seq: u64 = job_id
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    match seq % 5 {
        0 => WireStatus::FailCanRetry,
        1 => WireStatus::Fail,
        _ => WireStatus::Pass,
    }
}
