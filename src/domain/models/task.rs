//! Records kept by the admission governor for each admitted task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

use super::tier_input::TierKind;

/// Concurrency bucket a task is admitted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Swarm,
    Routine,
    Step,
}

impl QueueClass {
    pub const ALL: [QueueClass; 3] = [Self::Swarm, Self::Routine, Self::Step];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swarm => "swarm",
            Self::Routine => "routine",
            Self::Step => "step",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "swarm" => Some(Self::Swarm),
            "routine" => Some(Self::Routine),
            "step" => Some(Self::Step),
            _ => None,
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TierKind> for QueueClass {
    fn from(kind: TierKind) -> Self {
        match kind {
            TierKind::Swarm => Self::Swarm,
            TierKind::Routine => Self::Routine,
            TierKind::Step => Self::Step,
        }
    }
}

/// Lifecycle of an admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Admitted,
    Running,
    Paused,
    Completed,
    Failed,
    TimedOut,
    Stopped,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Stopped | Self::Cancelled
        )
    }

    /// Whether the task currently holds an admission slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, Self::Admitted | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a task has been escalated by the long-running policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub pauses_used: u32,
    pub stops_used: u32,
}

impl RetryState {
    pub fn label(&self) -> String {
        match (self.pauses_used, self.stops_used) {
            (0, 0) => "none".to_string(),
            (1, 0) => "paused_once".to_string(),
            (p, 0) => format!("paused_{p}x"),
            (_, 1) => "stopped_once".to_string(),
            (_, s) => format!("stopped_{s}x"),
        }
    }
}

/// Governor-owned record of an admitted task.
#[derive(Debug, Clone)]
pub struct ActiveTaskRecord {
    pub task_id: Uuid,
    pub queue_class: QueueClass,
    /// Monotonic start used for every elapsed-time decision.
    pub started_at: Instant,
    pub admitted_at: DateTime<Utc>,
    pub is_premium_user: bool,
    pub retry_state: RetryState,
    pub state: TaskState,
    /// Hard ceiling; never later than `started_at + task_timeout`.
    pub deadline: Instant,
    pub estimated_cost: Option<f64>,
}

impl ActiveTaskRecord {
    pub fn elapsed_at(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Admitted.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        for state in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::TimedOut,
            TaskState::Stopped,
            TaskState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(!state.holds_slot());
        }
        assert!(!TaskState::Paused.holds_slot());
    }

    #[test]
    fn test_retry_state_labels() {
        assert_eq!(RetryState::default().label(), "none");
        let paused = RetryState {
            pauses_used: 1,
            stops_used: 0,
        };
        assert_eq!(paused.label(), "paused_once");
        let stopped = RetryState {
            pauses_used: 1,
            stops_used: 1,
        };
        assert_eq!(stopped.label(), "stopped_once");
    }

    #[test]
    fn test_queue_class_from_tier() {
        assert_eq!(QueueClass::from(TierKind::Routine), QueueClass::Routine);
        assert_eq!(QueueClass::parse(" STEP "), Some(QueueClass::Step));
        assert_eq!(QueueClass::parse("llm"), None);
    }
}
