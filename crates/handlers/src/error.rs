//! `HandlerError`: what a handler invocation can fail with.
//!
//! Mirrors the familiar `DispatchError` split between domain-decision
//! failures and port failures, collapsed to the cases the failure table
//! actually distinguishes: a concurrency conflict is "handled, not an
//! error" everywhere in this workspace, so it is not even a variant here —
//! callers treat `Ok(HandlerOutcome::AlreadyHandled)` as the concurrency
//! path instead of matching an error.

use thiserror::Error;

use taskbridge_core::DomainError;
use taskbridge_ports::PortError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("failed to decode a stored event payload: {0}")]
    Deserialize(String),
    #[error("handler was cancelled before completion")]
    Cancelled,
}

pub type HandlerResult<T> = Result<T, HandlerError>;
