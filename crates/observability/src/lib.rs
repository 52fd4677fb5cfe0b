//! Shared `tracing`/`tracing-subscriber` setup for every binary in this
//! workspace.

/// Initialize process-wide logging. Safe to call multiple times;
/// subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Filter/formatter layer configuration.
pub mod tracing;


