//! `IdempotencyStore` adapters.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;
