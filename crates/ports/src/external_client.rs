//! The `ExternalServiceClient` port: the outbound boundary to the external
//! job-processing service.

use async_trait::async_trait;
use thiserror::Error;

use taskbridge_core::PollOutcome;

/// Status of a job as reported by the external service. `InProgress` maps to
/// no event; the three terminal/can-retry variants map directly to
/// `PollOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobStatus {
    InProgress,
    Pass,
    Fail,
    FailCanRetry,
}

impl ExternalJobStatus {
    pub fn to_poll_outcome(self) -> Option<PollOutcome> {
        match self {
            ExternalJobStatus::InProgress => None,
            ExternalJobStatus::Pass => Some(PollOutcome::Pass),
            ExternalJobStatus::Fail => Some(PollOutcome::Fail),
            ExternalJobStatus::FailCanRetry => Some(PollOutcome::FailCanRetry),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExternalClientError {
    #[error("external service request timed out")]
    Timeout,
    #[error("external service returned an error: {0}")]
    ServiceError(String),
    #[error("external service sent a malformed response: {0}")]
    MalformedResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound client for the external job-processing service. SubmitJob calls
/// `submit`; PollExternalJob calls `poll`. `submit` must be idempotent on
/// `(requestId, attempt)` — the same pair must always return the same job
/// id, which is what makes a crash between the external call and the
/// local append safe to retry.
#[async_trait]
pub trait ExternalServiceClient: Send + Sync {
    /// Submit a new job for the given attempt, carrying the payload from
    /// the originating intake row, and return the external service's job
    /// id. Calling this twice with the same `(request_id, attempt)` must
    /// return the same job id rather than creating a second job.
    async fn submit(
        &self,
        request_id: &taskbridge_core::RequestId,
        attempt: u32,
        payload: &serde_json::Value,
    ) -> Result<String, ExternalClientError>;

    /// Poll the current status of a previously submitted job.
    async fn poll(&self, external_job_id: &str) -> Result<ExternalJobStatus, ExternalClientError>;
}

#[async_trait]
impl<S> ExternalServiceClient for std::sync::Arc<S>
where
    S: ExternalServiceClient + ?Sized,
{
    async fn submit(
        &self,
        request_id: &taskbridge_core::RequestId,
        attempt: u32,
        payload: &serde_json::Value,
    ) -> Result<String, ExternalClientError> {
        (**self).submit(request_id, attempt, payload).await
    }

    async fn poll(&self, external_job_id: &str) -> Result<ExternalJobStatus, ExternalClientError> {
        (**self).poll(external_job_id).await
    }
}
