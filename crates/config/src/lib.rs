//! Environment-driven configuration, `WF_`-prefixed.
//!
//! Follows the existing repository's style for reading configuration:
//! plain `std::env::var` lookups with documented defaults, not a layered
//! config-file/CLI/env crate. A variable that's set but doesn't parse is a
//! hard error — silently falling back to the default would hide a typo in
//! an operator's environment.

use std::time::Duration;

use thiserror::Error;

use taskbridge_ports::WorkflowConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} is set to {value:?} but must be a {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
}

/// Load `WorkflowConfig` from the process environment, falling back to
/// `WorkflowConfig::default()` for anything unset.
pub fn load_workflow_config() -> Result<WorkflowConfig, ConfigError> {
    let defaults = WorkflowConfig::default();

    Ok(WorkflowConfig {
        intake_batch_size: env_usize("WF_INTAKE_BATCH_SIZE", defaults.intake_batch_size)?,
        poll_batch_size: env_usize("WF_POLL_BATCH_SIZE", defaults.poll_batch_size)?,
        lease_duration: env_duration_secs("WF_LEASE_DURATION_SECS", defaults.lease_duration)?,
        idempotency_lease_duration: env_duration_secs(
            "WF_IDEMPOTENCY_LEASE_DURATION_SECS",
            defaults.idempotency_lease_duration,
        )?,
        poll_interval: env_duration_secs("WF_POLL_INTERVAL_SECS", defaults.poll_interval)?,
        max_submit_attempts: env_u32("WF_MAX_SUBMIT_ATTEMPTS", defaults.max_submit_attempts)?,
        discover_interval: env_duration_secs("WF_DISCOVER_INTERVAL_SECS", defaults.discover_interval)?,
        schedule_poll_interval: env_duration_secs(
            "WF_SCHEDULE_POLL_INTERVAL_SECS",
            defaults.schedule_poll_interval,
        )?,
        external_call_timeout: env_duration_secs(
            "WF_EXTERNAL_CALL_TIMEOUT_SECS",
            defaults.external_call_timeout,
        )?,
    })
}

/// Everything `taskbridge-service` needs beyond the `WorkflowConfig`
/// tunables: where to store state, where the external service lives, and
/// where to bind its own health surface.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// When `true`, wire Postgres-backed adapters instead of in-memory
    /// ones; requires `DATABASE_URL`.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub external_service_url: String,
    pub bind_addr: String,
}

pub fn load_service_config() -> Result<ServiceConfig, ConfigError> {
    let use_persistent_stores = env_bool("USE_PERSISTENT_STORES", false)?;
    let database_url = std::env::var("DATABASE_URL").ok();
    if use_persistent_stores && database_url.is_none() {
        return Err(ConfigError::Missing("DATABASE_URL"));
    }

    Ok(ServiceConfig {
        use_persistent_stores,
        database_url,
        external_service_url: std::env::var("EXTERNAL_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string()),
        bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
    })
}

fn env_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected: "non-negative integer",
        }),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected: "non-negative integer",
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                name,
                value,
                expected: "number of seconds",
            }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected: "true or false",
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_workflow_config_default_when_unset() {
        // SAFETY (test-only): clears any of this process's WF_ vars so the
        // assertion reflects `WorkflowConfig::default()`, not leftover state
        // from another test running in the same process.
        for name in [
            "WF_INTAKE_BATCH_SIZE",
            "WF_POLL_BATCH_SIZE",
            "WF_LEASE_DURATION_SECS",
            "WF_IDEMPOTENCY_LEASE_DURATION_SECS",
            "WF_POLL_INTERVAL_SECS",
            "WF_MAX_SUBMIT_ATTEMPTS",
            "WF_DISCOVER_INTERVAL_SECS",
            "WF_SCHEDULE_POLL_INTERVAL_SECS",
            "WF_EXTERNAL_CALL_TIMEOUT_SECS",
        ] {
            std::env::remove_var(name);
        }

        let loaded = load_workflow_config().unwrap();
        assert_eq!(loaded, WorkflowConfig::default());
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        std::env::set_var("WF_MAX_SUBMIT_ATTEMPTS", "not-a-number");
        let err = load_workflow_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WF_MAX_SUBMIT_ATTEMPTS", .. }));
        std::env::remove_var("WF_MAX_SUBMIT_ATTEMPTS");
    }

    #[test]
    fn persistent_stores_without_database_url_is_an_error() {
        std::env::set_var("USE_PERSISTENT_STORES", "true");
        std::env::remove_var("DATABASE_URL");
        let err = load_service_config().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
        std::env::remove_var("USE_PERSISTENT_STORES");
    }
}
