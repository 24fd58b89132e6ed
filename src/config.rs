use crate::error::{CoreError, Result};
use std::time::Duration;

/// Engine-wide tunables: default document TTL, child polling bounds, and
/// lock-cleaner scheduling.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Default expiration assigned to task documents created without one.
    pub default_task_ttl: Duration,
    /// Interval between polls of fanned-out child tasks.
    pub child_poll_interval: Duration,
    /// Polling attempt bound; exceeding it is a reported Timeout, never a
    /// hang.
    pub max_poll_attempts: u32,
    /// How often the periodic entity-lock cleaner starts a sweep.
    pub lock_cleaner_interval: Duration,
    /// Maximum entity locks one cleaner sweep will process.
    pub lock_page_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_task_ttl: Duration::from_secs(24 * 60 * 60), // 1 day
            child_poll_interval: Duration::from_secs(1),
            max_poll_attempts: 600,
            lock_cleaner_interval: Duration::from_secs(60),
            lock_page_limit: 1000,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(ttl) = std::env::var("FLEETCORE_TASK_TTL_SECS") {
            config.default_task_ttl = Duration::from_secs(ttl.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid FLEETCORE_TASK_TTL_SECS: {e}"))
            })?);
        }

        if let Ok(interval) = std::env::var("FLEETCORE_CHILD_POLL_INTERVAL_MS") {
            config.child_poll_interval = Duration::from_millis(interval.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid FLEETCORE_CHILD_POLL_INTERVAL_MS: {e}"))
            })?);
        }

        if let Ok(attempts) = std::env::var("FLEETCORE_MAX_POLL_ATTEMPTS") {
            config.max_poll_attempts = attempts.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid FLEETCORE_MAX_POLL_ATTEMPTS: {e}"))
            })?;
        }

        if let Ok(interval) = std::env::var("FLEETCORE_LOCK_CLEANER_INTERVAL_SECS") {
            config.lock_cleaner_interval = Duration::from_secs(interval.parse().map_err(|e| {
                CoreError::configuration(format!(
                    "Invalid FLEETCORE_LOCK_CLEANER_INTERVAL_SECS: {e}"
                ))
            })?);
        }

        if let Ok(limit) = std::env::var("FLEETCORE_LOCK_PAGE_LIMIT") {
            config.lock_page_limit = limit.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid FLEETCORE_LOCK_PAGE_LIMIT: {e}"))
            })?;
        }

        Ok(config)
    }

    /// Configuration with short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            default_task_ttl: Duration::from_secs(60 * 60),
            child_poll_interval: Duration::from_millis(10),
            max_poll_attempts: 200,
            lock_cleaner_interval: Duration::from_millis(100),
            lock_page_limit: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config = CoreConfig::default();
        assert!(config.max_poll_attempts > 0);
        assert!(config.lock_page_limit > 0);
        assert!(config.child_poll_interval > Duration::ZERO);
    }
}
