use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{RangingError, Result};

/// Tunables for the session coordinator and its helpers
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Delay before the first health check after a session starts running (default: 10s)
    pub health_check_grace: Duration,
    /// Interval between subsequent health checks (default: 5s)
    pub health_check_interval: Duration,
    /// Base of the restart backoff floor, doubled per retry (default: 2s)
    pub restart_backoff_base: Duration,
    /// Restarts attempted before health checking gives up (default: 3)
    pub max_retries: u32,
    /// Time allowed for the first direction-bearing measurement (default: 5s)
    pub direction_timeout: Duration,
    /// Direction timeout for hardware known to converge poorly (default: 2.5s)
    pub limited_direction_timeout: Duration,
    /// Minimum spacing between processed convergence events per peer (default: 1s)
    pub convergence_window: Duration,
    /// Minimum spacing between dropped-update diagnostics per peer (default: 2s)
    pub diagnostic_log_interval: Duration,
    /// Wait after a foreground signal before scanning for stuck sessions (default: 1s)
    pub suspension_recovery_grace: Duration,
    /// Window in which an inbound invite collides with our outbound one (default: 1.2s)
    pub handshake_window: Duration,
    /// Distance change that counts as significant, in metres (default: 0.1)
    pub distance_threshold: f32,
    /// Direction change that counts as significant, in degrees (default: 5.0)
    pub direction_threshold_degrees: f32,
    /// Maximum number of user-facing direction hints (default: 3)
    pub max_direction_hints: usize,
    /// Capacity of the event broadcast channel (default: 256)
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            health_check_grace: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(5),
            restart_backoff_base: Duration::from_secs(2),
            max_retries: 3,
            direction_timeout: Duration::from_secs(5),
            limited_direction_timeout: Duration::from_millis(2500),
            convergence_window: Duration::from_secs(1),
            diagnostic_log_interval: Duration::from_secs(2),
            suspension_recovery_grace: Duration::from_secs(1),
            handshake_window: Duration::from_millis(1200),
            distance_threshold: 0.1,
            direction_threshold_degrees: 5.0,
            max_direction_hints: 3,
            event_channel_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Load overrides from `RANGING_*` environment variables (and `.env`)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            health_check_grace: env_millis("RANGING_HEALTH_CHECK_GRACE_MS", defaults.health_check_grace)?,
            health_check_interval: env_millis(
                "RANGING_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval,
            )?,
            restart_backoff_base: env_millis(
                "RANGING_RESTART_BACKOFF_BASE_MS",
                defaults.restart_backoff_base,
            )?,
            max_retries: env_parse("RANGING_MAX_RETRIES", defaults.max_retries)?,
            direction_timeout: env_millis("RANGING_DIRECTION_TIMEOUT_MS", defaults.direction_timeout)?,
            limited_direction_timeout: env_millis(
                "RANGING_LIMITED_DIRECTION_TIMEOUT_MS",
                defaults.limited_direction_timeout,
            )?,
            convergence_window: env_millis("RANGING_CONVERGENCE_WINDOW_MS", defaults.convergence_window)?,
            diagnostic_log_interval: env_millis(
                "RANGING_DIAGNOSTIC_LOG_INTERVAL_MS",
                defaults.diagnostic_log_interval,
            )?,
            suspension_recovery_grace: env_millis(
                "RANGING_SUSPENSION_RECOVERY_GRACE_MS",
                defaults.suspension_recovery_grace,
            )?,
            handshake_window: env_millis("RANGING_HANDSHAKE_WINDOW_MS", defaults.handshake_window)?,
            distance_threshold: env_parse("RANGING_DISTANCE_THRESHOLD", defaults.distance_threshold)?,
            direction_threshold_degrees: env_parse(
                "RANGING_DIRECTION_THRESHOLD_DEGREES",
                defaults.direction_threshold_degrees,
            )?,
            max_direction_hints: env_parse("RANGING_MAX_DIRECTION_HINTS", defaults.max_direction_hints)?,
            event_channel_capacity: env_parse(
                "RANGING_EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
        })
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RangingError::Configuration(format!("{}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    let millis = env_parse(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.handshake_window, Duration::from_millis(1200));
        assert_eq!(config.convergence_window, Duration::from_secs(1));
        assert!(config.limited_direction_timeout < config.direction_timeout);
    }

    #[test]
    fn test_env_overrides_and_errors() {
        env::set_var("RANGING_TEST_ONLY_MS", "750");
        assert_eq!(
            env_millis("RANGING_TEST_ONLY_MS", Duration::from_secs(1)).unwrap(),
            Duration::from_millis(750)
        );

        env::set_var("RANGING_TEST_ONLY_BAD", "soon");
        let err = env_parse::<u32>("RANGING_TEST_ONLY_BAD", 3).unwrap_err();
        assert!(matches!(err, RangingError::Configuration(_)));

        assert_eq!(env_parse::<u32>("RANGING_TEST_ONLY_MISSING", 3).unwrap(), 3);
    }
}
