//! Per-queue-class admission limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::QueueClass;
use crate::domain::errors::{DomainError, DomainResult};

/// Upper bound on `max_active`; concurrency is kept deliberately small.
pub const MAX_ACTIVE_CEILING: usize = 50;

/// What to do the first time a task crosses its long-running threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongRunningPolicy {
    #[default]
    Pause,
    Stop,
}

/// Admission and degradation limits for one queue class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActiveTaskRegistryLimits {
    pub max_active: usize,
    pub high_load_check_interval_ms: u64,
    /// Fraction in `(0, 1)`.
    pub high_load_threshold_percentage: f64,
    pub long_running_threshold_free_ms: u64,
    pub long_running_threshold_premium_ms: u64,
    pub task_timeout_ms: u64,
    pub shutdown_grace_period_ms: u64,
    #[serde(default)]
    pub on_long_running_first_threshold: LongRunningPolicy,
    pub long_running_pause_retries: u32,
    pub long_running_stop_retries: u32,
}

impl Default for ActiveTaskRegistryLimits {
    fn default() -> Self {
        Self {
            max_active: 10,
            high_load_check_interval_ms: 30_000,
            high_load_threshold_percentage: 0.8,
            long_running_threshold_free_ms: 300_000,
            long_running_threshold_premium_ms: 900_000,
            task_timeout_ms: 1_800_000,
            shutdown_grace_period_ms: 30_000,
            on_long_running_first_threshold: LongRunningPolicy::Pause,
            long_running_pause_retries: 1,
            long_running_stop_retries: 0,
        }
    }
}

impl ActiveTaskRegistryLimits {
    /// Defaults tuned for swarm coordination: few, long-lived tasks.
    pub fn swarm_defaults() -> Self {
        Self {
            max_active: 5,
            high_load_check_interval_ms: 60_000,
            long_running_threshold_free_ms: 600_000,
            long_running_threshold_premium_ms: 1_800_000,
            task_timeout_ms: 3_600_000,
            long_running_stop_retries: 1,
            ..Self::default()
        }
    }

    /// Defaults tuned for individual steps: short, numerous tasks.
    pub fn step_defaults() -> Self {
        Self {
            max_active: 20,
            high_load_check_interval_ms: 10_000,
            long_running_threshold_free_ms: 60_000,
            long_running_threshold_premium_ms: 300_000,
            task_timeout_ms: 600_000,
            shutdown_grace_period_ms: 10_000,
            on_long_running_first_threshold: LongRunningPolicy::Stop,
            ..Self::default()
        }
    }

    pub fn long_running_threshold(&self, is_premium_user: bool) -> Duration {
        if is_premium_user {
            Duration::from_millis(self.long_running_threshold_premium_ms)
        } else {
            Duration::from_millis(self.long_running_threshold_free_ms)
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.high_load_check_interval_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Check the numeric invariants; violations must abort initialization.
    pub fn validate(&self, queue: QueueClass) -> DomainResult<()> {
        let invalid = |reason: String| DomainError::InvalidLimits { queue, reason };

        if self.max_active == 0 || self.max_active > MAX_ACTIVE_CEILING {
            return Err(invalid(format!(
                "max_active must be between 1 and {MAX_ACTIVE_CEILING}, got {}",
                self.max_active
            )));
        }
        if self.high_load_check_interval_ms == 0 {
            return Err(invalid(
                "high_load_check_interval_ms must be positive".to_string(),
            ));
        }
        let pct = self.high_load_threshold_percentage;
        if !(pct > 0.0 && pct < 1.0) {
            return Err(invalid(format!(
                "high_load_threshold_percentage must be in (0, 1), got {pct}"
            )));
        }
        if self.long_running_threshold_free_ms == 0 {
            return Err(invalid(
                "long_running_threshold_free_ms must be positive".to_string(),
            ));
        }
        if self.long_running_threshold_premium_ms <= self.long_running_threshold_free_ms {
            return Err(invalid(format!(
                "long_running_threshold_premium_ms ({}) must exceed long_running_threshold_free_ms ({})",
                self.long_running_threshold_premium_ms, self.long_running_threshold_free_ms
            )));
        }
        if self.task_timeout_ms <= self.long_running_threshold_premium_ms {
            return Err(invalid(format!(
                "task_timeout_ms ({}) must exceed long_running_threshold_premium_ms ({})",
                self.task_timeout_ms, self.long_running_threshold_premium_ms
            )));
        }
        Ok(())
    }
}
