//! A deterministic in-memory fake for `ExternalServiceClient`, scripted by
//! tests rather than backed by real HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use taskbridge_core::RequestId;
use taskbridge_ports::{ExternalClientError, ExternalJobStatus, ExternalServiceClient};

#[derive(Debug, Default)]
pub struct FakeExternalServiceClient {
    /// One job id per `(RequestId, attempt)`, assigned on first `submit`
    /// and returned unchanged on every subsequent call for that pair — a
    /// later attempt for the same request gets its own, distinct job id.
    jobs: Mutex<HashMap<(String, u32), String>>,
    submit_calls: Mutex<HashMap<String, u32>>,
    /// Scripted `poll` responses, consumed in order; once exhausted, `poll`
    /// keeps returning the last scripted response (or `InProgress` if none
    /// was ever scripted).
    poll_script: Mutex<HashMap<String, VecDeque<ExternalJobStatus>>>,
    poll_calls: Mutex<HashMap<String, u32>>,
    next_job_seq: Mutex<u64>,
}

impl FakeExternalServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the statuses `poll` will return for `external_job_id`, in order.
    pub fn script_poll(&self, external_job_id: impl Into<String>, responses: Vec<ExternalJobStatus>) {
        self.poll_script
            .lock()
            .expect("lock poisoned")
            .insert(external_job_id.into(), responses.into_iter().collect());
    }

    pub fn submit_call_count(&self, request_id: &RequestId) -> u32 {
        self.submit_calls
            .lock()
            .expect("lock poisoned")
            .get(&request_id.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn poll_call_count(&self, external_job_id: &str) -> u32 {
        self.poll_calls
            .lock()
            .expect("lock poisoned")
            .get(external_job_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExternalServiceClient for FakeExternalServiceClient {
    async fn submit(
        &self,
        request_id: &RequestId,
        attempt: u32,
        _payload: &serde_json::Value,
    ) -> Result<String, ExternalClientError> {
        let id_str = request_id.to_string();
        *self
            .submit_calls
            .lock()
            .expect("lock poisoned")
            .entry(id_str.clone())
            .or_insert(0) += 1;

        let mut jobs = self.jobs.lock().expect("lock poisoned");
        let key = (id_str, attempt);
        if let Some(existing) = jobs.get(&key) {
            return Ok(existing.clone());
        }
        let mut seq = self.next_job_seq.lock().expect("lock poisoned");
        *seq += 1;
        let job_id = format!("fake-job-{seq}");
        jobs.insert(key, job_id.clone());
        Ok(job_id)
    }

    async fn poll(&self, external_job_id: &str) -> Result<ExternalJobStatus, ExternalClientError> {
        *self
            .poll_calls
            .lock()
            .expect("lock poisoned")
            .entry(external_job_id.to_string())
            .or_insert(0) += 1;

        let mut script = self.poll_script.lock().expect("lock poisoned");
        match script.get_mut(external_job_id) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => Ok(*queue.front().unwrap_or(&ExternalJobStatus::InProgress)),
            None => Ok(ExternalJobStatus::InProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn submit_is_idempotent_per_request_id_and_attempt() {
        let client = FakeExternalServiceClient::new();
        let request_id = RequestId::new("p1", "r1").unwrap();
        let first = client.submit(&request_id, 1, &json!({})).await.unwrap();
        let second = client.submit(&request_id, 1, &json!({})).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.submit_call_count(&request_id), 2);
    }

    #[tokio::test]
    async fn distinct_attempts_get_distinct_job_ids() {
        let client = FakeExternalServiceClient::new();
        let request_id = RequestId::new("p1", "r1").unwrap();
        let attempt_1 = client.submit(&request_id, 1, &json!({})).await.unwrap();
        let attempt_2 = client.submit(&request_id, 2, &json!({})).await.unwrap();
        assert_ne!(attempt_1, attempt_2);
    }

    #[tokio::test]
    async fn poll_replays_scripted_sequence_then_holds_last() {
        let client = FakeExternalServiceClient::new();
        client.script_poll("job-1", vec![ExternalJobStatus::InProgress, ExternalJobStatus::Pass]);

        assert_eq!(client.poll("job-1").await.unwrap(), ExternalJobStatus::InProgress);
        assert_eq!(client.poll("job-1").await.unwrap(), ExternalJobStatus::Pass);
        assert_eq!(client.poll("job-1").await.unwrap(), ExternalJobStatus::Pass);
    }
}
