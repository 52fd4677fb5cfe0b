//! Deterministic event-id generation.
//!
//! Produces a URL-safe identifier from `(aggregateId, eventType,
//! correlationId?, causationId?, discriminator?)`. The same inputs always
//! produce the same id; a different discriminator always produces a
//! different one. Handlers rely on this to make retries of the same causal
//! trigger collide onto the same physical event id, which is what lets the
//! event store reject the duplicate append and lets a crashed-then-retried
//! handler republish instead of re-deciding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::DomainError;

/// Compute a deterministic, URL-safe event id.
///
/// Each field is length-prefixed (4-byte little-endian length, then the
/// UTF-8 bytes) before being hashed, rather than joined with a literal
/// separator character. This keeps the encoding unambiguous even if a field
/// happens to contain whatever separator byte we might otherwise have
/// chosen — two different tuples of fields can never hash to the same
/// byte stream. Absent optional fields contribute a zero-length segment,
/// i.e. nulls are normalized to empty.
pub fn create_deterministic(
    aggregate_id: &str,
    event_type: &str,
    correlation_id: Option<&str>,
    causation_id: Option<&str>,
    discriminator: Option<&str>,
) -> Result<String, DomainError> {
    if aggregate_id.is_empty() {
        return Err(DomainError::validation("aggregateId must not be empty"));
    }
    if event_type.is_empty() {
        return Err(DomainError::validation("eventType must not be empty"));
    }

    let mut hasher = Sha256::new();
    for field in [
        Some(aggregate_id),
        Some(event_type),
        correlation_id,
        causation_id,
        discriminator,
    ] {
        let bytes = field.unwrap_or("").as_bytes();
        hasher.update((bytes.len() as u32).to_le_bytes());
        hasher.update(bytes);
    }

    let digest = hasher.finalize();
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_id() {
        let a = create_deterministic("req-1", "request.discovered.v1", Some("req-1"), None, None)
            .unwrap();
        let b = create_deterministic("req-1", "request.discovered.v1", Some("req-1"), None, None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn differing_discriminator_yields_distinct_ids() {
        let a = create_deterministic(
            "req-1",
            "submission.prepared.v1",
            Some("req-1"),
            None,
            Some("attempt:1"),
        )
        .unwrap();
        let b = create_deterministic(
            "req-1",
            "submission.prepared.v1",
            Some("req-1"),
            None,
            Some("attempt:2"),
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn none_and_empty_string_discriminator_collide() {
        // Nulls normalize to empty: an explicit "" must hash identically to None.
        let a = create_deterministic("req-1", "request.discovered.v1", None, None, None).unwrap();
        let b = create_deterministic("req-1", "request.discovered.v1", Some(""), None, None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_aggregate_id() {
        assert!(create_deterministic("", "request.discovered.v1", None, None, None).is_err());
    }

    #[test]
    fn rejects_empty_event_type() {
        assert!(create_deterministic("req-1", "", None, None, None).is_err());
    }

    #[test]
    fn output_is_url_safe_without_padding() {
        let id = create_deterministic("req-1", "request.discovered.v1", None, None, None).unwrap();
        assert!(!id.contains('+'));
        assert!(!id.contains('/'));
        assert!(!id.contains('='));
    }

    #[test]
    fn length_prefixing_avoids_ambiguous_concatenation() {
        // Without length-prefixing, ("ab", "c") and ("a", "bc") would collide
        // under naive concatenation. They must not collide here.
        let a = create_deterministic("ab", "c", None, None, None).unwrap();
        let b = create_deterministic("a", "bc", None, None, None).unwrap();
        assert_ne!(a, b);
    }
}
