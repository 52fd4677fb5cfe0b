//! `InvocationContext`: explicit causal metadata threaded through every
//! handler call.
//!
//! A natural implementation describes ambient, cooperatively
//! cancellable tasks that carry correlation state implicitly. Rust has no
//! implicit task-local context propagation across an `await` the way that
//! model assumes, and reaching for thread-locals here would silently break
//! under `tokio::spawn`. Instead this context is an explicit value, passed
//! as a parameter into every handler and port call that needs it — still
//! cheap to thread (it is `Clone` and small), just visible in every
//! signature instead of implicit.
use chrono::{DateTime, Utc};

/// Carries the causal chain (which event caused this handler to run) and a
/// stable correlation id (which request this all traces back to) through a
/// single handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    correlation_id: String,
    causation_id: Option<String>,
}

impl InvocationContext {
    /// Start a new causal chain — used by Discover and ScheduleDuePolls,
    /// which are triggered by a timer rather than by an upstream event.
    pub fn root(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: None,
        }
    }

    /// Derive the context for a handler invoked in reaction to `caused_by`,
    /// an upstream event's deterministic id. Correlation id is preserved
    /// across the whole chain; causation id always points at the immediate
    /// trigger.
    pub fn caused_by(correlation_id: impl Into<String>, caused_by: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: Some(caused_by.into()),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }
}

/// Cooperative cancellation signal threaded through every suspension point
/// (external calls, storage round-trips). A plain wrapper around
/// `tokio_util::sync::CancellationToken` kept here so ports and handlers
/// depend on one name rather than importing `tokio_util` everywhere.
#[derive(Debug, Clone)]
pub struct CancelSignal(tokio_util::sync::CancellationToken);

impl CancelSignal {
    pub fn new() -> Self {
        Self(tokio_util::sync::CancellationToken::new())
    }

    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot useful for structured log fields without
/// reaching for `Clock` at every call site that only wants to *record* a
/// timestamp rather than make a decision with it.
pub fn timestamp_field(now: DateTime<Utc>) -> String {
    now.to_rfc3339()
}
