//! Shared test fixtures for `taskbridge-handlers`' own test suites and for
//! `taskbridge-service` integration tests: a controllable clock, a
//! scriptable external-service fake, and re-exports of the in-memory port
//! adapters from `taskbridge-infra` so tests don't need to depend on that
//! crate directly.

mod external_client;
mod clock;

pub use clock::FakeClock;
pub use external_client::FakeExternalServiceClient;

pub use taskbridge_infra::event_bus::InMemoryEventBus;
pub use taskbridge_infra::event_store::InMemoryEventStore;
pub use taskbridge_infra::idempotency::InMemoryIdempotencyStore;
pub use taskbridge_infra::intake_repo::InMemoryIntakeRepository;
pub use taskbridge_infra::projection_repo::InMemoryProjectionRepository;
