//! Strategy-facing models: contexts, estimates, results and metrics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::context::ExecutionContext;

/// Execution mode of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Deterministic,
    Reasoning,
    Conversational,
    Routing,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Reasoning => "reasoning",
            Self::Conversational => "conversational",
            Self::Routing => "routing",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "deterministic" => Some(Self::Deterministic),
            "reasoning" => Some(Self::Reasoning),
            "conversational" => Some(Self::Conversational),
            "routing" => Some(Self::Routing),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kind of deterministic work, ordered from most to least expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    DirectMapping,
    DataTransform,
    CodeExecution,
    ApiIntegration,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectMapping => "direct-mapping",
            Self::DataTransform => "data-transform",
            Self::CodeExecution => "code-execution",
            Self::ApiIntegration => "api-integration",
        }
    }
}

/// Everything a strategy needs to run one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyContext {
    pub step_id: String,
    pub step_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Output keys the step is expected to produce.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Raw step configuration; parsed with [`StepConfig::from_value`].
    #[serde(default)]
    pub config: Value,
    pub execution: ExecutionContext,
}

impl StrategyContext {
    pub fn new(
        step_id: impl Into<String>,
        step_type: impl Into<String>,
        execution: ExecutionContext,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_type: step_type.into(),
            description: None,
            inputs: Map::new(),
            expected_outputs: Vec::new(),
            config: Value::Object(Map::new()),
            execution,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.expected_outputs.push(key.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Number of input plus output keys; drives cost estimates.
    pub fn complexity(&self) -> usize {
        self.inputs.len() + self.expected_outputs.len()
    }

    /// Parsed config, or `None` when the raw config is malformed.
    pub fn step_config(&self) -> Option<StepConfig> {
        StepConfig::from_value(&self.config).ok()
    }
}

/// A declarative route used by the routing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Input field to inspect.
    pub field: String,
    /// Value the field must equal for the route to match.
    pub equals: Value,
    pub target: String,
}

/// A field-level operation used by data-transform steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRule {
    pub field: String,
    pub op: TransformOp,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    Uppercase,
    Lowercase,
    Trim,
    ToNumber,
    ToString,
    Length,
}

/// Typed view of a step's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    /// Explicit strategy name; overrides keyword heuristics.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub kind: Option<ExecutionKind>,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Output key -> input key.
    #[serde(default)]
    pub mapping: Map<String, Value>,
    #[serde(default)]
    pub transforms: Vec<TransformRule>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default)]
    pub default_route: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl StepConfig {
    /// Parse a raw config; `null` and non-objects are malformed.
    pub fn from_value(raw: &Value) -> Result<Self, String> {
        match raw {
            Value::Null => Err("malformed context: config is missing".to_string()),
            Value::Object(_) => serde_json::from_value(raw.clone())
                .map_err(|e| format!("malformed context: invalid config ({e})")),
            other => Err(format!(
                "malformed context: config must be an object, got {}",
                json_type_name(other)
            )),
        }
    }

    /// The explicit strategy, if `strategy` parses as one. Values such as
    /// `"auto"` yield `None` and leave selection to the keyword rules.
    pub fn named_strategy(&self) -> Option<StrategyType> {
        self.strategy.as_deref().and_then(StrategyType::parse)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Projected resource usage of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEstimate {
    pub tokens: u64,
    pub api_calls: u32,
    pub compute_time_ms: u64,
    /// Credits.
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub strategy_type: StrategyType,
    pub confidence: f64,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceEstimate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    pub issues: Vec<String>,
}

/// Structured outcome of a strategy execution. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ExecutionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<ExecutionFeedback>,
}

impl ExecutionResult {
    pub fn success(strategy_type: StrategyType, result: Value, confidence: f64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            metadata: ExecutionMetadata {
                strategy_type,
                confidence,
                execution_time_ms: 0,
                resource_usage: None,
            },
            feedback: None,
        }
    }

    pub fn failure(strategy_type: StrategyType, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: ExecutionMetadata {
                strategy_type,
                confidence: 0.0,
                execution_time_ms: 0,
                resource_usage: None,
            },
            feedback: None,
        }
    }

    /// Failure caused by missing required inputs.
    ///
    /// The error text always contains `"validation failed"`; downstream
    /// components match on that substring.
    pub fn validation_failed(strategy_type: StrategyType, missing: Vec<String>) -> Self {
        let error = format!(
            "Input validation failed: missing required inputs [{}]",
            missing.join(", ")
        );
        let issues = missing
            .into_iter()
            .map(|field| format!("Missing required input: {field}"))
            .collect();
        Self {
            feedback: Some(ExecutionFeedback { issues }),
            ..Self::failure(strategy_type, error)
        }
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.feedback
            .get_or_insert_with(ExecutionFeedback::default)
            .issues
            .push(issue.into());
        self
    }

    pub fn is_validation_failure(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.to_lowercase().contains("validation failed"))
    }
}

/// Rolling performance counters reported by a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_execution_time: f64,
    /// Mean estimated cost (credits) per execution.
    pub average_resource_usage: f64,
    pub average_confidence: f64,
    pub evolution_score: f64,
}

impl PerformanceMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_executions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_config_rejects_null_and_scalars() {
        assert!(StepConfig::from_value(&Value::Null).is_err());
        assert!(StepConfig::from_value(&json!("deterministic")).is_err());
        assert!(StepConfig::from_value(&json!({})).is_ok());
    }

    #[test]
    fn test_step_config_parses_fields() {
        let cfg = StepConfig::from_value(&json!({
            "strategy": "Deterministic",
            "requiredInputs": ["a", "b"],
            "kind": "api-integration"
        }))
        .unwrap();
        assert_eq!(cfg.named_strategy(), Some(StrategyType::Deterministic));
        let auto = StepConfig::from_value(&json!({"strategy": "auto"})).unwrap();
        assert_eq!(auto.named_strategy(), None);
        assert_eq!(cfg.required_inputs, vec!["a", "b"]);
        assert_eq!(cfg.kind, Some(ExecutionKind::ApiIntegration));
    }

    #[test]
    fn test_validation_failed_result_shape() {
        let result =
            ExecutionResult::validation_failed(StrategyType::Deterministic, vec!["x".to_string()]);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("validation failed"));
        assert!(result.is_validation_failure());
        assert_eq!(result.feedback.unwrap().issues.len(), 1);
    }

    #[test]
    fn test_execution_kind_ordering() {
        assert!(ExecutionKind::ApiIntegration > ExecutionKind::CodeExecution);
        assert!(ExecutionKind::CodeExecution > ExecutionKind::DataTransform);
        assert!(ExecutionKind::DataTransform > ExecutionKind::DirectMapping);
    }
}
