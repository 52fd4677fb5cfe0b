//! `IntakeRepository` adapters.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIntakeRepository;
pub use postgres::PostgresIntakeRepository;
