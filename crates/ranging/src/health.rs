// Health & Retry - stall detection with bounded, backed-off restarts

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::CoordinatorConfig;

/// Restart policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.restart_backoff_base,
        }
    }

    /// Minimum spacing after the last restart: `base * 2^retry_count`
    pub fn backoff_floor(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

/// Outcome of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Session is not stalled
    Healthy,
    /// Stalled but still inside the backoff floor
    Backoff { remaining: Duration },
    /// Request restart number `attempt` (1-based)
    Restart { attempt: u32 },
    /// Retries exhausted; stop checking
    GiveUp { attempts: u32 },
}

/// Per-peer retry bookkeeping
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    policy: RetryPolicy,
    retry_count: u32,
    last_restart_at: Option<Instant>,
    exhausted: bool,
}

impl HealthMonitor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
            last_restart_at: None,
            exhausted: false,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_restart_at(&self) -> Option<Instant> {
        self.last_restart_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Evaluate a check. `stalled` means running with no measurement ever received.
    pub fn check(&mut self, stalled: bool, now: Instant) -> HealthVerdict {
        if self.exhausted {
            return HealthVerdict::GiveUp {
                attempts: self.retry_count,
            };
        }
        if !stalled {
            return HealthVerdict::Healthy;
        }

        if self.retry_count >= self.policy.max_retries {
            self.exhausted = true;
            return HealthVerdict::GiveUp {
                attempts: self.retry_count,
            };
        }

        if let Some(last) = self.last_restart_at {
            let floor = self.policy.backoff_floor(self.retry_count);
            let elapsed = now.duration_since(last);
            if elapsed < floor {
                debug!(
                    "Restart suppressed by backoff: {:?} elapsed, floor {:?}",
                    elapsed, floor
                );
                return HealthVerdict::Backoff {
                    remaining: floor - elapsed,
                };
            }
        }

        self.retry_count += 1;
        self.last_restart_at = Some(now);
        HealthVerdict::Restart {
            attempt: self.retry_count,
        }
    }

    /// Ranging was reached with a measurement
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.last_restart_at = None;
        self.exhausted = false;
    }
}
