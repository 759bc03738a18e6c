//! Payload shapes for the three execution tiers.
//!
//! Tiers are implemented independently and do not share a tag field on the
//! wire; [`TierInput`] is the tagged form produced once a payload has been
//! discriminated at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which tier a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Swarm,
    Routine,
    Step,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swarm => "swarm",
            Self::Routine => "routine",
            Self::Step => "step",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier 1 input: a swarm goal plus optional team/tooling hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmExecutionInput {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_configuration: Option<TeamConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<Vec<ToolDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_config: Option<SwarmExecutionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfiguration {
    pub leader_agent_id: String,
    pub preferred_team_size: u32,
    pub required_skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmExecutionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// In `[0, 2]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// At least 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_execution_limit: Option<u32>,
}

/// Tier 2 input: a routine invocation with an optional workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineExecutionInput {
    pub routine_id: String,
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub dependencies: Vec<StepDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDependency {
    pub step_id: String,
    pub depends_on: Vec<String>,
}

/// Tier 3 input: a single step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionInput {
    pub step_id: String,
    pub step_type: String,
    pub parameters: Map<String, Value>,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// A payload after structural discrimination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TierInput {
    Swarm(SwarmExecutionInput),
    Routine(RoutineExecutionInput),
    Step(StepExecutionInput),
}

impl TierInput {
    pub fn kind(&self) -> TierKind {
        match self {
            Self::Swarm(_) => TierKind::Swarm,
            Self::Routine(_) => TierKind::Routine,
            Self::Step(_) => TierKind::Step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_input_tagged_serialization() {
        let input = TierInput::Step(StepExecutionInput {
            step_id: "s1".to_string(),
            step_type: "transform".to_string(),
            parameters: Map::new(),
            strategy: "deterministic".to_string(),
            tool_name: None,
        });

        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["kind"], "step");
        assert_eq!(value["value"]["stepId"], "s1");

        let back: TierInput = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), TierKind::Step);
    }

    #[test]
    fn test_routine_input_defaults_dependencies() {
        let raw = json!({
            "routineId": "r1",
            "parameters": {},
            "workflow": { "steps": [] }
        });
        let routine: RoutineExecutionInput = serde_json::from_value(raw).unwrap();
        assert!(routine.workflow.unwrap().dependencies.is_empty());
    }
}
