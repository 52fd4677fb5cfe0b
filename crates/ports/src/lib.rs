//! Port traits: the seams between the handlers/domain layer and every
//! adapter (in-memory, Postgres, HTTP) in `taskbridge-infra`.
//!
//! Nothing in this crate touches a network socket or a SQL driver — it only
//! declares the shapes adapters must fill in, so handlers can be written
//! and tested against a fake long before a real backend exists.

mod clock;
mod config;
mod context;
mod error;
mod event_store;
mod external_client;
mod idempotency;
mod intake;
mod projection_repo;
mod publisher;

pub use clock::{Clock, SystemClock};
pub use config::WorkflowConfig;
pub use context::{timestamp_field, CancelSignal, InvocationContext};
pub use error::PortError;
pub use event_store::{EventStore, EventStoreError, ExpectedVersion, StoredEvent, UncommittedEvent};
pub use external_client::{ExternalClientError, ExternalJobStatus, ExternalServiceClient};
pub use idempotency::{IdempotencyError, IdempotencyRecord, IdempotencyStore};
pub use intake::{IntakeError, IntakeRepository, IntakeRow, IntakeStatus};
pub use projection_repo::{ProjectionRepoError, ProjectionRepository};
pub use publisher::{EventPublisher, PublishError};
