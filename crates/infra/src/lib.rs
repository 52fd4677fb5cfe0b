//! Adapters for every port in `taskbridge-ports`: an
//! in-memory and a Postgres-backed implementation of each storage port, an
//! in-process event bus, and an HTTP client for the external job service.
//!
//! Nothing in `taskbridge-handlers` depends on this crate directly — it is
//! wired up only by `taskbridge-service` (and by tests that want the real
//! adapters instead of `taskbridge-testkit`'s fakes).

pub mod event_bus;
pub mod event_store;
pub mod external_client;
pub mod idempotency;
pub mod intake_repo;
pub mod projection_repo;
