//! `ExternalServiceClient` adapters.

pub mod http;

pub use http::HttpExternalServiceClient;
