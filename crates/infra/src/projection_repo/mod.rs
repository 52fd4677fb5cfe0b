//! `ProjectionRepository` adapters.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryProjectionRepository;
pub use postgres::PostgresProjectionRepository;
