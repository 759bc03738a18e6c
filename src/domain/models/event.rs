//! Cross-tier events recorded in the rolling history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::task::QueueClass;

/// Originating layer of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "tier1")]
    Coordination,
    #[serde(rename = "tier2")]
    Process,
    #[serde(rename = "tier3")]
    Execution,
    #[serde(rename = "cross-tier")]
    Cross,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordination => "tier1",
            Self::Process => "tier2",
            Self::Execution => "tier3",
            Self::Cross => "cross-tier",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<QueueClass> for Tier {
    fn from(queue: QueueClass) -> Self {
        match queue {
            QueueClass::Swarm => Self::Coordination,
            QueueClass::Routine => Self::Process,
            QueueClass::Step => Self::Execution,
        }
    }
}

/// Well-known event type names.
pub mod event_types {
    pub const STRATEGY_SELECTED: &str = "strategy_selected";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const ROUTINE_COMPLETED: &str = "routine.completed";
    pub const ROUTINE_FAILED: &str = "routine.failed";
    pub const RESOURCE_ALLOCATED: &str = "resource.allocated";
    pub const RESOURCE_EXHAUSTED: &str = "resource.exhausted";
    pub const SWARM_DECISION: &str = "swarm.decision";
    pub const SWARM_ADAPTED: &str = "swarm.adapted";
    pub const SWARM_COMPLETED: &str = "swarm.completed";
    pub const SWARM_FAILED: &str = "swarm.failed";
    pub const TASK_ADMITTED: &str = "task.admitted";
    pub const TASK_REJECTED: &str = "task.rejected";
    pub const TASK_PAUSED: &str = "task.paused";
    pub const TASK_RESUMED: &str = "task.resumed";
    pub const TASK_STOPPED: &str = "task.stopped";
    pub const TASK_TIMEOUT: &str = "task.timeout";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const GOVERNOR_HIGH_LOAD: &str = "governor.high_load";
    pub const GOVERNOR_SHUTDOWN: &str = "governor.shutdown";
}

/// One immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tier: Tier,
    pub component: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl TierEvent {
    pub fn new(
        event_type: impl Into<String>,
        tier: Tier,
        component: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            tier,
            component: component.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Numeric field; numeric strings are accepted as well.
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// Error, failure or timeout events, by naming convention.
    pub fn is_error(&self) -> bool {
        let t = self.event_type.to_lowercase();
        t.contains("error") || t.contains("failed") || t.contains("failure") || t.contains("timeout")
    }

    /// Key an error event clusters under: its `errorType`, `"timeout"` for
    /// timeouts, otherwise the event type.
    ///
    /// `None` for non-errors and for rollups ([`event_types::TASK_FAILED`],
    /// [`event_types::ROUTINE_FAILED`]) that restate a failure already
    /// recorded by the step that caused it.
    pub fn error_type(&self) -> Option<&str> {
        if !self.is_error() || ROLLUP_FAILURES.contains(&self.event_type.as_str()) {
            return None;
        }
        let fallback = if self.event_type.to_lowercase().contains("timeout") {
            "timeout"
        } else {
            self.event_type.as_str()
        };
        Some(self.data_str("errorType").unwrap_or(fallback))
    }
}

const ROLLUP_FAILURES: [&str; 2] = [event_types::TASK_FAILED, event_types::ROUTINE_FAILED];
