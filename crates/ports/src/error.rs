//! The port-level error aggregate.
//!
//! Handlers see one `PortError` regardless of which adapter failed, mirroring
//! the familiar `DomainError`/`DispatchError` split: domain errors
//! (`taskbridge_core::DomainError`) are decision-time validation failures;
//! `PortError` is everything that can go wrong talking to the outside world.

use thiserror::Error;

use crate::{
    EventStoreError, ExternalClientError, IdempotencyError, IntakeError, ProjectionRepoError,
    PublishError,
};

#[derive(Debug, Error)]
pub enum PortError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    #[error(transparent)]
    ProjectionRepo(#[from] ProjectionRepoError),
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
    #[error(transparent)]
    ExternalClient(#[from] ExternalClientError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}
