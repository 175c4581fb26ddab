use std::time::Duration;

use serde::{Deserialize, Serialize};

const START_TIMEOUT_ENV: &str = "HOROVOD_ELASTIC_START_TIMEOUT";
const DEFAULT_START_TIMEOUT_SECS: u64 = 600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// Tunables for the elastic driver.
///
/// `start_timeout` defaults to 600s and can be overridden with the
/// `HOROVOD_ELASTIC_START_TIMEOUT` environment variable (integer seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Minimum number of workers required to start or resume a round.
    pub min_np: u32,
    /// Maximum number of workers the assigner may place.
    pub max_np: u32,
    /// Deadline for `wait_for_available_hosts`.
    pub start_timeout: Duration,
    /// Discovery polling period (spec: `DISCOVER_HOSTS_FREQUENCY_SECS`).
    pub poll_interval: Duration,
}

impl DriverConfig {
    pub fn new(min_np: u32, max_np: u32) -> Self {
        Self {
            min_np,
            max_np,
            start_timeout: Duration::from_secs(Self::start_timeout_secs_from_env()),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Reads `HOROVOD_ELASTIC_START_TIMEOUT`, falling back to the default
    /// when unset or unparseable.
    fn start_timeout_secs_from_env() -> u64 {
        std::env::var(START_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_START_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_600_seconds() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe {
            std::env::remove_var(START_TIMEOUT_ENV);
        }
        let config = DriverConfig::new(2, 4);
        assert_eq!(config.start_timeout, Duration::from_secs(600));
    }

    #[test]
    fn honors_env_override() {
        unsafe {
            std::env::set_var(START_TIMEOUT_ENV, "5");
        }
        let config = DriverConfig::new(2, 4);
        assert_eq!(config.start_timeout, Duration::from_secs(5));
        unsafe {
            std::env::remove_var(START_TIMEOUT_ENV);
        }
    }
}
