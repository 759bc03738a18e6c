//! Execution context and resource envelopes shared by every tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and lineage of one execution.
///
/// `parent_execution_id` chains form a tree rooted at a swarm-level
/// execution (see [`crate::services::tier_validator::validate_execution_lineage`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: String,
    pub swarm_id: String,
    pub user_id: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<String>,
}

impl ExecutionContext {
    /// Create a root (swarm-level) context.
    pub fn new(
        execution_id: impl Into<String>,
        swarm_id: impl Into<String>,
        user_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            swarm_id: swarm_id.into(),
            user_id: user_id.into(),
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            parent_execution_id: None,
            step_id: None,
            routine_id: None,
        }
    }

    /// Derive a child context for a nested execution.
    pub fn child(&self, execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            swarm_id: self.swarm_id.clone(),
            user_id: self.user_id.clone(),
            correlation_id: self.correlation_id.clone(),
            timestamp: Utc::now(),
            parent_execution_id: Some(self.execution_id.clone()),
            step_id: None,
            routine_id: self.routine_id.clone(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_routine(mut self, routine_id: impl Into<String>) -> Self {
        self.routine_id = Some(routine_id.into());
        self
    }

    /// A swarm-level execution has no parent and is not bound to a step or routine.
    pub fn is_swarm_level(&self) -> bool {
        self.parent_execution_id.is_none() && self.step_id.is_none() && self.routine_id.is_none()
    }

    /// Required string fields are all non-empty.
    pub fn is_valid(&self) -> bool {
        [
            &self.execution_id,
            &self.swarm_id,
            &self.user_id,
            &self.correlation_id,
        ]
        .iter()
        .all(|s| !s.trim().is_empty())
    }
}

/// Resource envelope granted to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    /// Non-negative decimal string; kept as text to preserve precision.
    pub max_credits: String,
    pub max_duration_ms: u64,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: u64,
}

impl ResourceAllocation {
    pub fn new(max_credits: impl Into<String>, max_duration_ms: u64, max_memory_mb: u64) -> Self {
        Self {
            max_credits: max_credits.into(),
            max_duration_ms,
            max_memory_mb,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max_duration_ms > 0 && self.max_memory_mb > 0 && is_credit_amount(&self.max_credits)
    }

    /// Lossy view of `max_credits` for budget comparisons.
    pub fn credits_as_f64(&self) -> Option<f64> {
        if is_credit_amount(&self.max_credits) {
            self.max_credits.trim().parse().ok()
        } else {
            None
        }
    }
}

/// `true` for strings like `"100"`, `"0.25"`, `"1234567890123456789012"`.
pub fn is_credit_amount(raw: &str) -> bool {
    let raw = raw.trim();
    let mut parts = raw.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match fraction {
        None => digits(whole),
        Some(frac) => digits(whole) && digits(frac),
    }
}

/// A request crossing a tier boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierExecutionRequest<T> {
    pub context: ExecutionContext,
    pub input: T,
    pub allocation: ResourceAllocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_amount_parsing() {
        assert!(is_credit_amount("0"));
        assert!(is_credit_amount("100"));
        assert!(is_credit_amount("12.5"));
        assert!(is_credit_amount("123456789012345678901234567890"));
        assert!(!is_credit_amount(""));
        assert!(!is_credit_amount("-5"));
        assert!(!is_credit_amount("1."));
        assert!(!is_credit_amount(".5"));
        assert!(!is_credit_amount("1e9"));
        assert!(!is_credit_amount("abc"));
    }

    #[test]
    fn test_child_context_links_parent() {
        let root = ExecutionContext::new("exec-1", "swarm-1", "user-1", "corr-1");
        assert!(root.is_swarm_level());

        let child = root.child("exec-2").with_step("step-a");
        assert_eq!(child.parent_execution_id.as_deref(), Some("exec-1"));
        assert_eq!(child.swarm_id, "swarm-1");
        assert!(!child.is_swarm_level());
    }

    #[test]
    fn test_allocation_validity() {
        assert!(ResourceAllocation::new("10", 1000, 256).is_valid());
        assert!(!ResourceAllocation::new("10", 0, 256).is_valid());
        assert!(!ResourceAllocation::new("10", 1000, 0).is_valid());
        assert!(!ResourceAllocation::new("ten", 1000, 256).is_valid());
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let ctx = ExecutionContext::new("e", "s", "u", "c").with_routine("r");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["executionId"], "e");
        assert_eq!(json["routineId"], "r");
        assert!(json.get("parentExecutionId").is_none());
    }
}
