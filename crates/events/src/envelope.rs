use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskbridge_core::RequestId;

/// Wire/storage envelope for a published event.
///
/// An `EventEnvelope` wraps a domain event with the transport metadata a
/// subscriber needs without decoding `data`: identity (`id`), routing
/// (`event_type`, `source`, `subject`), timing (`time`), and causal
/// threading (`correlation_id`, `causation_id`). This is the shape published
/// on the event bus and is close to CloudEvents' attribute set, which is
/// deliberate — it is the shape most external consumers already expect.
///
/// ## Why Envelopes?
///
/// Envelopes separate **infrastructure concerns** (identity, routing,
/// causal metadata) from **domain concerns** (the event payload itself).
/// This keeps domain events themselves transport-agnostic:
///
/// ```text
/// Domain Event (WorkflowEvent::JobSubmitted)
///     ↓
/// EventEnvelope { id, event_type, subject, correlation_id, causation_id, data: event }
///     ↓
/// Event Store / Event Bus (infrastructure layer)
/// ```
///
/// ## Identity
///
/// `id` is the deterministic event id produced by
/// `taskbridge_core::create_deterministic` — not a random UUID. Two
/// envelopes with the same `id` are, by construction, the same logical
/// event; this is what lets the event store reject a duplicate append and
/// what lets a crashed handler republish instead of re-decide on retry.
///
/// ## Generic Payload
///
/// The `D` type parameter lets the same envelope shape carry either the
/// typed `WorkflowEvent` enum (in-process) or `serde_json::Value` (at the
/// storage/transport boundary, where schema flexibility matters more than
/// compile-time typing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<D> {
    /// Deterministic event id.
    id: String,
    event_type: String,
    /// Producer identity, e.g. `"taskbridge/handlers"`.
    source: String,
    /// `/requests/{requestId}` — the aggregate stream this event belongs to.
    subject: String,
    time: DateTime<Utc>,
    datacontenttype: String,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    data: D,
}

impl<D> EventEnvelope<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        request_id: &RequestId,
        time: DateTime<Utc>,
        correlation_id: Option<String>,
        causation_id: Option<String>,
        data: D,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            source: source.into(),
            subject: format!("/requests/{request_id}"),
            time,
            datacontenttype: "application/json".to_string(),
            correlation_id,
            causation_id,
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_requests_slash_request_id() {
        let request_id = RequestId::new("p1", "r1").unwrap();
        let envelope = EventEnvelope::new(
            "evt-1",
            "request.discovered.v1",
            "taskbridge/handlers",
            &request_id,
            Utc::now(),
            Some("corr-1".to_string()),
            None,
            serde_json::json!({"requestId": "p1|r1"}),
        );
        assert_eq!(envelope.subject(), "/requests/p1|r1");
        assert_eq!(envelope.datacontenttype, "application/json");
    }

    #[test]
    fn wire_fields_are_camel_case() {
        let request_id = RequestId::new("p1", "r1").unwrap();
        let envelope = EventEnvelope::new(
            "evt-1",
            "request.discovered.v1",
            "taskbridge/handlers",
            &request_id,
            Utc::now(),
            None,
            None,
            serde_json::json!({}),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("eventType"));
        assert!(obj.contains_key("correlationId"));
        assert!(obj.contains_key("causationId"));
        assert!(obj.contains_key("datacontenttype"));
    }
}

