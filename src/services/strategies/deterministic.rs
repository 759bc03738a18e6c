//! Deterministic execution: cheap, repeatable steps with no model in the loop.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::performance::PerformanceTracker;
use super::rules::{KeywordRules, KindRules};
use super::{precheck, run_guarded};
use crate::domain::models::{
    ExecutionKind, ExecutionResult, PerformanceMetrics, ResourceEstimate, StepConfig,
    StrategyContext, StrategyType, TransformOp, TransformRule,
};
use crate::domain::ports::{ExecutionStrategy, ToolInvoker};

const SUCCESS_CONFIDENCE: f64 = 0.95;
const COST_PER_KEY: f64 = 0.000_5;
const COMPUTE_MS_PER_KEY: u64 = 10;

/// Base cost band of each sub-kind: (credits, compute ms, api calls).
///
/// Bands strictly decrease from api-integration to direct-mapping and share
/// one per-key slope, so the ordering holds for any fixed context.
fn cost_band(kind: ExecutionKind) -> (f64, u64, u32) {
    match kind {
        ExecutionKind::ApiIntegration => (0.010, 1_500, 1),
        ExecutionKind::CodeExecution => (0.006, 800, 0),
        ExecutionKind::DataTransform => (0.003, 120, 0),
        ExecutionKind::DirectMapping => (0.001, 20, 0),
    }
}

pub struct DeterministicStrategy {
    rules: KeywordRules,
    kinds: KindRules,
    tools: Option<Arc<dyn ToolInvoker>>,
    tracker: PerformanceTracker,
}

impl Default for DeterministicStrategy {
    fn default() -> Self {
        Self::new(KeywordRules::default(), KindRules::default())
    }
}

impl DeterministicStrategy {
    pub fn new(rules: KeywordRules, kinds: KindRules) -> Self {
        Self {
            rules,
            kinds,
            tools: None,
            tracker: PerformanceTracker::new(5_000.0),
        }
    }

    /// Tool invoker used for api-integration and code-execution steps.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Explicit `config.kind` wins; otherwise keyword classification.
    pub fn classify(&self, context: &StrategyContext, config: Option<&StepConfig>) -> ExecutionKind {
        if let Some(kind) = config.and_then(|c| c.kind) {
            return kind;
        }
        let tool = config.and_then(|c| c.tool_name.as_deref()).unwrap_or_default();
        let description = context.description.as_deref().unwrap_or_default();
        self.kinds
            .classify(&[context.step_type.as_str(), tool, description])
    }

    fn direct_mapping(context: &StrategyContext, config: &StepConfig) -> ExecutionResult {
        let mut output = Map::new();

        if config.mapping.is_empty() {
            if context.expected_outputs.is_empty() {
                output.clone_from(&context.inputs);
            } else {
                for key in &context.expected_outputs {
                    match context.inputs.get(key) {
                        Some(value) => {
                            output.insert(key.clone(), value.clone());
                        }
                        None => {
                            return ExecutionResult::failure(
                                StrategyType::Deterministic,
                                format!("no input provides expected output '{key}'"),
                            );
                        }
                    }
                }
            }
        } else {
            for (target, source) in &config.mapping {
                let Some(source_key) = source.as_str() else {
                    return ExecutionResult::failure(
                        StrategyType::Deterministic,
                        format!("mapping for '{target}' must name an input key"),
                    );
                };
                let Some(value) = context.inputs.get(source_key) else {
                    return ExecutionResult::failure(
                        StrategyType::Deterministic,
                        format!("mapping source '{source_key}' not found in inputs"),
                    );
                };
                output.insert(target.clone(), value.clone());
            }
        }

        ExecutionResult::success(
            StrategyType::Deterministic,
            Value::Object(output),
            SUCCESS_CONFIDENCE,
        )
    }

    fn apply_op(op: TransformOp, value: &Value) -> Result<Value, String> {
        let as_text = || match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("{op:?} needs a string, got {other}")),
        };
        Ok(match op {
            TransformOp::Uppercase => Value::String(as_text()?.to_uppercase()),
            TransformOp::Lowercase => Value::String(as_text()?.to_lowercase()),
            TransformOp::Trim => Value::String(as_text()?.trim().to_string()),
            TransformOp::ToString => match value {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            },
            TransformOp::ToNumber => match value {
                Value::Number(_) => value.clone(),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{s}' is not numeric"))?,
                other => return Err(format!("cannot convert {other} to a number")),
            },
            TransformOp::Length => match value {
                Value::String(s) => Value::from(s.chars().count()),
                Value::Array(items) => Value::from(items.len()),
                Value::Object(map) => Value::from(map.len()),
                other => return Err(format!("{other} has no length")),
            },
        })
    }

    fn data_transform(context: &StrategyContext, transforms: &[TransformRule]) -> ExecutionResult {
        let mut output = context.inputs.clone();
        for rule in transforms {
            let Some(value) = context.inputs.get(&rule.field) else {
                return ExecutionResult::failure(
                    StrategyType::Deterministic,
                    format!("transform field '{}' not found in inputs", rule.field),
                );
            };
            match Self::apply_op(rule.op, value) {
                Ok(transformed) => {
                    let target = rule.output.clone().unwrap_or_else(|| rule.field.clone());
                    output.insert(target, transformed);
                }
                Err(reason) => {
                    return ExecutionResult::failure(
                        StrategyType::Deterministic,
                        format!("transform of '{}' failed: {reason}", rule.field),
                    );
                }
            }
        }
        ExecutionResult::success(
            StrategyType::Deterministic,
            Value::Object(output),
            SUCCESS_CONFIDENCE,
        )
    }

    async fn invoke_tool(
        &self,
        kind: ExecutionKind,
        context: &StrategyContext,
        config: &StepConfig,
    ) -> ExecutionResult {
        let Some(tools) = self.tools.as_ref() else {
            return ExecutionResult::failure(
                StrategyType::Deterministic,
                format!("no tool invoker configured for {} steps", kind.as_str()),
            );
        };
        let Some(tool_name) = config.tool_name.as_deref() else {
            return ExecutionResult::failure(
                StrategyType::Deterministic,
                format!("{} step '{}' does not name a tool", kind.as_str(), context.step_id),
            );
        };
        match tools.invoke(tool_name, &context.inputs).await {
            Ok(value) => {
                ExecutionResult::success(StrategyType::Deterministic, value, SUCCESS_CONFIDENCE)
            }
            Err(err) => ExecutionResult::failure(
                StrategyType::Deterministic,
                format!("tool '{tool_name}' failed: {err}"),
            ),
        }
    }

    async fn run(&self, context: StrategyContext) -> ExecutionResult {
        let config = match precheck(StrategyType::Deterministic, &context) {
            Ok(config) => config,
            Err(rejected) => return rejected,
        };
        match self.classify(&context, Some(&config)) {
            ExecutionKind::DirectMapping => Self::direct_mapping(&context, &config),
            ExecutionKind::DataTransform => Self::data_transform(&context, &config.transforms),
            kind @ (ExecutionKind::ApiIntegration | ExecutionKind::CodeExecution) => {
                self.invoke_tool(kind, &context, &config).await
            }
        }
    }
}

#[async_trait]
impl ExecutionStrategy for DeterministicStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Deterministic
    }

    fn name(&self) -> &str {
        "deterministic"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn can_handle(&self, step_type: &str, config: Option<&StepConfig>) -> bool {
        if let Some(named) = config.and_then(StepConfig::named_strategy) {
            return named == StrategyType::Deterministic;
        }
        config.is_some_and(|c| c.kind.is_some() || !c.mapping.is_empty() || !c.transforms.is_empty())
            || self.rules.matches(StrategyType::Deterministic, &[step_type])
    }

    fn estimate_resources(&self, context: &StrategyContext) -> ResourceEstimate {
        let config = context.step_config();
        let kind = self.classify(context, config.as_ref());
        let (base_cost, base_ms, api_calls) = cost_band(kind);
        let keys = context.complexity() as u64;

        ResourceEstimate {
            tokens: 0,
            api_calls,
            compute_time_ms: base_ms + COMPUTE_MS_PER_KEY * keys,
            cost: base_cost + COST_PER_KEY * keys as f64,
        }
    }

    async fn execute(&self, context: StrategyContext, cancel: CancellationToken) -> ExecutionResult {
        let estimate = self.estimate_resources(&context);
        run_guarded(
            StrategyType::Deterministic,
            &self.tracker,
            estimate,
            &cancel,
            self.run(context),
        )
        .await
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.tracker.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionContext;
    use crate::domain::ports::BackendError;
    use serde_json::json;

    fn ctx(step_type: &str) -> StrategyContext {
        StrategyContext::new("step-1", step_type, ExecutionContext::new("e", "s", "u", "c"))
    }

    struct EchoTools;

    #[async_trait]
    impl ToolInvoker for EchoTools {
        async fn invoke(
            &self,
            tool_name: &str,
            parameters: &Map<String, Value>,
        ) -> Result<Value, BackendError> {
            if tool_name == "broken" {
                return Err(BackendError::Unavailable("down".to_string()));
            }
            Ok(json!({"tool": tool_name, "echo": parameters}))
        }
    }

    #[test]
    fn test_cost_increases_with_complexity() {
        let strategy = DeterministicStrategy::default();
        let simple = ctx("copy").with_input("a", json!(1)).with_output("b");
        let complex = ctx("copy")
            .with_input("a", json!(1))
            .with_input("c", json!(2))
            .with_input("d", json!(3))
            .with_output("b")
            .with_output("e");
        let low = strategy.estimate_resources(&simple);
        let high = strategy.estimate_resources(&complex);
        assert!(high.cost > low.cost);
        assert!(high.compute_time_ms > low.compute_time_ms);
    }

    #[test]
    fn test_cost_bands_follow_kind_order() {
        let strategy = DeterministicStrategy::default();
        let cost_of = |kind: &str| {
            let c = ctx("step")
                .with_input("a", json!(1))
                .with_output("b")
                .with_config(json!({"kind": kind}));
            strategy.estimate_resources(&c).cost
        };
        let api = cost_of("api-integration");
        let code = cost_of("code-execution");
        let transform = cost_of("data-transform");
        let mapping = cost_of("direct-mapping");
        assert!(api > code && code > transform && transform > mapping);
    }

    #[test]
    fn test_can_handle_explicit_and_keywords() {
        let strategy = DeterministicStrategy::default();
        assert!(strategy.can_handle("format_output", None));
        assert!(!strategy.can_handle("brainstorm", None));

        let named = StepConfig {
            strategy: Some("deterministic".to_string()),
            ..Default::default()
        };
        assert!(strategy.can_handle("brainstorm", Some(&named)));

        let other = StepConfig {
            strategy: Some("reasoning".to_string()),
            ..Default::default()
        };
        assert!(!strategy.can_handle("format_output", Some(&other)));

        let auto = StepConfig {
            strategy: Some("auto".to_string()),
            ..Default::default()
        };
        assert!(strategy.can_handle("format_output", Some(&auto)));
    }

    #[tokio::test]
    async fn test_missing_required_input_fails_validation() {
        let strategy = DeterministicStrategy::default();
        let context = ctx("map_fields")
            .with_input("name", json!("x"))
            .with_config(json!({"requiredInputs": ["name", "email"]}));

        let result = strategy.execute(context, CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("validation failed"));
        assert_eq!(
            result.feedback.unwrap().issues,
            vec!["Missing required input: email".to_string()]
        );
    }

    #[tokio::test]
    async fn test_null_config_is_structured_failure() {
        let strategy = DeterministicStrategy::default();
        let context = ctx("map_fields").with_config(Value::Null);
        let result = strategy.execute(context, CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.metadata.confidence, 0.0);
        assert_eq!(strategy.performance_metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_direct_mapping_and_transform() {
        let strategy = DeterministicStrategy::default();

        let mapping = ctx("copy_fields")
            .with_input("first", json!("Ada"))
            .with_config(json!({"mapping": {"name": "first"}}));
        let result = strategy.execute(mapping, CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["name"], "Ada");

        let transform = ctx("normalize")
            .with_input("email", json!("  ADA@EXAMPLE.COM "))
            .with_config(json!({
                "kind": "data-transform",
                "transforms": [
                    {"field": "email", "op": "trim", "output": "trimmed"},
                    {"field": "email", "op": "length", "output": "len"}
                ]
            }));
        let result = strategy.execute(transform, CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        let out = result.result.unwrap();
        assert_eq!(out["trimmed"], "ADA@EXAMPLE.COM");
        assert_eq!(out["len"], 18);
    }

    #[tokio::test]
    async fn test_tool_steps_go_through_invoker() {
        let without_tools = DeterministicStrategy::default();
        let api = ctx("http_fetch").with_config(json!({"toolName": "weather"}));
        let result = without_tools
            .execute(api.clone(), CancellationToken::new())
            .await;
        assert!(!result.success);

        let with_tools = DeterministicStrategy::default().with_tools(Arc::new(EchoTools));
        let result = with_tools.execute(api, CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["tool"], "weather");

        let broken = ctx("http_fetch").with_config(json!({"toolName": "broken"}));
        let result = with_tools.execute(broken, CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("down"));
    }

    #[tokio::test]
    async fn test_sustained_success_keeps_scores_high() {
        let strategy = DeterministicStrategy::default();
        for i in 0..20 {
            let context = ctx("copy_fields")
                .with_input("v", json!(i))
                .with_config(json!({"requiredInputs": ["v"]}));
            assert!(strategy.execute(context, CancellationToken::new()).await.success);
        }
        let metrics = strategy.performance_metrics();
        assert_eq!(metrics.success_count, 20);
        assert!(metrics.average_confidence >= 0.9);
        assert!(metrics.evolution_score >= 0.8);
    }
}
