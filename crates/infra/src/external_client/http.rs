//! HTTP `ExternalServiceClient`, talking to the sample external-service
//! stub (or any service implementing the same contract) over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskbridge_core::RequestId;
use taskbridge_ports::{ExternalClientError, ExternalJobStatus, ExternalServiceClient};

#[derive(Debug, Clone)]
pub struct HttpExternalServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExternalServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalClientError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    request_id: &'a str,
    attempt: u32,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: WireStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireStatus {
    Created,
    InProgress,
    Pass,
    Fail,
    FailCanRetry,
}

impl From<WireStatus> for ExternalJobStatus {
    fn from(value: WireStatus) -> Self {
        match value {
            // A freshly created job hasn't run yet; treat it the same as
            // in-progress from the poller's point of view.
            WireStatus::Created | WireStatus::InProgress => ExternalJobStatus::InProgress,
            WireStatus::Pass => ExternalJobStatus::Pass,
            WireStatus::Fail => ExternalJobStatus::Fail,
            WireStatus::FailCanRetry => ExternalJobStatus::FailCanRetry,
        }
    }
}

#[async_trait]
impl ExternalServiceClient for HttpExternalServiceClient {
    #[instrument(skip(self, payload), fields(request_id = %request_id, attempt), err)]
    async fn submit(
        &self,
        request_id: &RequestId,
        attempt: u32,
        payload: &serde_json::Value,
    ) -> Result<String, ExternalClientError> {
        let request_id_str = request_id.to_string();
        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&CreateJobRequest {
                request_id: &request_id_str,
                attempt,
                payload,
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ExternalClientError::ServiceError(format!(
                "createJob returned {}",
                response.status()
            )));
        }

        let body: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| ExternalClientError::MalformedResponse(e.to_string()))?;
        Ok(body.job_id)
    }

    #[instrument(skip(self), fields(external_job_id), err)]
    async fn poll(&self, external_job_id: &str) -> Result<ExternalJobStatus, ExternalClientError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, external_job_id))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ExternalClientError::ServiceError(format!(
                "getStatus returned {}",
                response.status()
            )));
        }

        let body: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| ExternalClientError::MalformedResponse(e.to_string()))?;
        Ok(body.status.into())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ExternalClientError {
    if err.is_timeout() {
        ExternalClientError::Timeout
    } else {
        ExternalClientError::Transport(err.to_string())
    }
}
