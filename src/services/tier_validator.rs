//! Boundary validation for cross-tier payloads.
//!
//! Payloads arrive untyped (`serde_json::Value`) because the tiers are built
//! independently and share no tag field. The predicates here are pure and
//! never panic; callers fail fast on `false`. Once a payload passes,
//! [`TierInputValidator::discriminate`] wraps it in the closed [`TierInput`]
//! sum type so downstream code never probes structure again.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::domain::models::config::default_tier_order;
use crate::domain::models::context::is_credit_amount;
use crate::domain::models::{
    ExecutionContext, ResourceAllocation, TierExecutionRequest, TierInput, TierKind,
};

/// Why a request was refused before admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationRejection {
    #[error("Request must be a JSON object")]
    NotAnObject,

    #[error("Invalid execution context")]
    InvalidContext,

    #[error("Invalid resource allocation")]
    InvalidAllocation,

    #[error("Input does not match any tier shape")]
    UnrecognizedInput,

    #[error("Malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

fn non_empty_str(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn is_str(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(Value::is_string)
}

fn is_object(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(Value::is_object)
}

fn is_string_array(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().all(Value::is_string))
}

/// Present and not `null`.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> bool {
    present(obj, key).is_none_or(Value::is_string)
}

fn positive_integer(value: Option<&Value>) -> bool {
    value.and_then(Value::as_u64).is_some_and(|n| n > 0)
}

fn valid_team_configuration(value: &Value) -> bool {
    let Some(team) = value.as_object() else {
        return false;
    };
    non_empty_str(team, "leaderAgentId")
        && positive_integer(team.get("preferredTeamSize"))
        && is_string_array(team.get("requiredSkills"))
}

fn valid_tools(value: &Value) -> bool {
    let Some(tools) = value.as_array() else {
        return false;
    };
    tools.iter().all(|tool| {
        tool.as_object()
            .is_some_and(|t| non_empty_str(t, "name") && non_empty_str(t, "description"))
    })
}

fn valid_swarm_execution_config(value: &Value) -> bool {
    let Some(cfg) = value.as_object() else {
        return false;
    };
    let temperature_ok = present(cfg, "temperature").is_none_or(|t| {
        t.as_f64().is_some_and(|t| (0.0..=2.0).contains(&t))
    });
    let parallel_ok = present(cfg, "parallelExecutionLimit")
        .is_none_or(|p| positive_integer(Some(p)));
    let max_tokens_ok = present(cfg, "maxTokens").is_none_or(|m| positive_integer(Some(m)));
    temperature_ok && parallel_ok && max_tokens_ok && optional_string(cfg, "model")
}

/// Tier 1 shape: non-empty `goal` plus optional, individually checked hints.
pub fn validate_swarm_input(input: &Value) -> bool {
    let Some(obj) = input.as_object() else {
        return false;
    };
    if !non_empty_str(obj, "goal") {
        return false;
    }
    present(obj, "teamConfiguration").is_none_or(valid_team_configuration)
        && present(obj, "availableTools").is_none_or(valid_tools)
        && present(obj, "executionConfig").is_none_or(valid_swarm_execution_config)
}

fn valid_workflow_step(step: &Value) -> bool {
    step.as_object().is_some_and(|s| {
        non_empty_str(s, "id")
            && is_str(s, "name")
            && is_str(s, "toolName")
            && is_object(s, "parameters")
            && is_str(s, "strategy")
    })
}

fn valid_dependency(dep: &Value) -> bool {
    dep.as_object()
        .is_some_and(|d| non_empty_str(d, "stepId") && is_string_array(d.get("dependsOn")))
}

fn valid_workflow(value: &Value) -> bool {
    let Some(workflow) = value.as_object() else {
        return false;
    };
    let steps_ok = workflow
        .get("steps")
        .and_then(Value::as_array)
        .is_some_and(|steps| steps.iter().all(valid_workflow_step));
    let deps_ok = present(workflow, "dependencies").is_none_or(|deps| {
        deps.as_array()
            .is_some_and(|deps| deps.iter().all(valid_dependency))
    });
    steps_ok && deps_ok
}

/// Tier 2 shape: `routineId`, object `parameters`, optional workflow graph.
pub fn validate_routine_input(input: &Value) -> bool {
    let Some(obj) = input.as_object() else {
        return false;
    };
    non_empty_str(obj, "routineId")
        && is_object(obj, "parameters")
        && present(obj, "workflow").is_none_or(valid_workflow)
}

/// Tier 3 shape: `stepId`, `stepType`, `strategy`, object `parameters`.
pub fn validate_step_input(input: &Value) -> bool {
    let Some(obj) = input.as_object() else {
        return false;
    };
    non_empty_str(obj, "stepId")
        && non_empty_str(obj, "stepType")
        && non_empty_str(obj, "strategy")
        && is_object(obj, "parameters")
        && optional_string(obj, "toolName")
}

fn valid_timestamp(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
        _ => false,
    }
}

pub fn validate_execution_context(context: &Value) -> bool {
    let Some(obj) = context.as_object() else {
        return false;
    };
    ["executionId", "swarmId", "userId", "correlationId"]
        .iter()
        .all(|key| non_empty_str(obj, key))
        && valid_timestamp(obj.get("timestamp"))
        && ["parentExecutionId", "stepId", "routineId"]
            .iter()
            .all(|key| optional_string(obj, key))
}

pub fn validate_resource_allocation(allocation: &Value) -> bool {
    let Some(obj) = allocation.as_object() else {
        return false;
    };
    obj.get("maxCredits")
        .and_then(Value::as_str)
        .is_some_and(is_credit_amount)
        && positive_integer(obj.get("maxDurationMs"))
        && positive_integer(obj.get("maxMemoryMB"))
}

/// `parent_execution_id` chains must form a forest whose roots are
/// swarm-level executions: no cycles, no dangling parents, unique ids.
pub fn validate_execution_lineage(contexts: &[ExecutionContext]) -> bool {
    let mut by_id: HashMap<&str, &ExecutionContext> = HashMap::new();
    for ctx in contexts {
        if !ctx.is_valid() || by_id.insert(ctx.execution_id.as_str(), ctx).is_some() {
            return false;
        }
    }

    for ctx in contexts {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current: &ExecutionContext = ctx;
        while let Some(parent_id) = current.parent_execution_id.as_deref() {
            if !seen.insert(current.execution_id.as_str()) {
                return false;
            }
            match by_id.get(parent_id) {
                Some(&parent) if parent.swarm_id == current.swarm_id => current = parent,
                _ => return false,
            }
        }
        if !current.is_swarm_level() {
            return false;
        }
    }
    true
}

/// Discriminates untyped payloads in a configurable priority order.
#[derive(Debug, Clone)]
pub struct TierInputValidator {
    order: Vec<TierKind>,
}

impl Default for TierInputValidator {
    fn default() -> Self {
        Self::new(default_tier_order())
    }
}

impl TierInputValidator {
    /// Kinds missing from `order` are never matched; duplicates are ignored.
    pub fn new(order: Vec<TierKind>) -> Self {
        let mut seen = HashSet::new();
        let order = order.into_iter().filter(|k| seen.insert(*k)).collect();
        Self { order }
    }

    pub fn order(&self) -> &[TierKind] {
        &self.order
    }

    pub fn matches(kind: TierKind, input: &Value) -> bool {
        match kind {
            TierKind::Swarm => validate_swarm_input(input),
            TierKind::Routine => validate_routine_input(input),
            TierKind::Step => validate_step_input(input),
        }
    }

    /// First matching shape in priority order, or `None`.
    pub fn discriminate(&self, input: &Value) -> Option<TierInput> {
        self.order
            .iter()
            .find(|kind| Self::matches(**kind, input))
            .and_then(|kind| Self::decode(*kind, input).ok())
    }

    fn decode(kind: TierKind, input: &Value) -> Result<TierInput, serde_json::Error> {
        Ok(match kind {
            TierKind::Swarm => TierInput::Swarm(serde_json::from_value(input.clone())?),
            TierKind::Routine => TierInput::Routine(serde_json::from_value(input.clone())?),
            TierKind::Step => TierInput::Step(serde_json::from_value(input.clone())?),
        })
    }

    /// Full boundary check of a `{context, input, allocation}` request.
    pub fn validate_request(
        &self,
        request: &Value,
    ) -> Result<TierExecutionRequest<TierInput>, ValidationRejection> {
        let obj = request.as_object().ok_or(ValidationRejection::NotAnObject)?;

        let context_raw = obj.get("context").unwrap_or(&Value::Null);
        if !validate_execution_context(context_raw) {
            return Err(ValidationRejection::InvalidContext);
        }
        let allocation_raw = obj.get("allocation").unwrap_or(&Value::Null);
        if !validate_resource_allocation(allocation_raw) {
            return Err(ValidationRejection::InvalidAllocation);
        }
        let input_raw = obj.get("input").unwrap_or(&Value::Null);
        let kind = self
            .order
            .iter()
            .copied()
            .find(|kind| Self::matches(*kind, input_raw))
            .ok_or(ValidationRejection::UnrecognizedInput)?;

        let context: ExecutionContext =
            serde_json::from_value(context_raw.clone()).map_err(|e| {
                ValidationRejection::Malformed {
                    field: "context",
                    reason: e.to_string(),
                }
            })?;
        let allocation: ResourceAllocation = serde_json::from_value(allocation_raw.clone())
            .map_err(|e| ValidationRejection::Malformed {
                field: "allocation",
                reason: e.to_string(),
            })?;
        let input = Self::decode(kind, input_raw).map_err(|e| ValidationRejection::Malformed {
            field: "input",
            reason: e.to_string(),
        })?;

        debug!(
            execution_id = %context.execution_id,
            tier = %kind,
            "request passed boundary validation"
        );

        Ok(TierExecutionRequest {
            context,
            input,
            allocation,
        })
    }
}

/// Discriminate with the default Swarm → Routine → Step order.
pub fn discriminate(input: &Value) -> Option<TierInput> {
    TierInputValidator::default().discriminate(input)
}
