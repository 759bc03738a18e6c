//! Model-backed reasoning for open-ended steps.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::performance::PerformanceTracker;
use super::rules::KeywordRules;
use super::{precheck, run_guarded};
use crate::domain::models::{
    ExecutionResult, PerformanceMetrics, ResourceEstimate, StepConfig, StrategyContext,
    StrategyType,
};
use crate::domain::ports::{ExecutionStrategy, InferenceBackend, InferenceRequest};

const DEFAULT_CONFIDENCE: f64 = 0.75;
const BASE_TOKENS: u64 = 800;
const TOKENS_PER_KEY: u64 = 200;
const CREDITS_PER_TOKEN: f64 = 0.000_02;

pub struct ReasoningStrategy {
    rules: KeywordRules,
    backend: Option<Arc<dyn InferenceBackend>>,
    tracker: PerformanceTracker,
}

impl Default for ReasoningStrategy {
    fn default() -> Self {
        Self::new(KeywordRules::default())
    }
}

impl ReasoningStrategy {
    pub fn new(rules: KeywordRules) -> Self {
        Self {
            rules,
            backend: None,
            tracker: PerformanceTracker::new(30_000.0),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn prompt_for(context: &StrategyContext, config: &StepConfig) -> String {
        let task = config
            .prompt
            .clone()
            .or_else(|| context.description.clone())
            .unwrap_or_else(|| format!("Complete the '{}' step", context.step_type));
        if context.expected_outputs.is_empty() {
            task
        } else {
            format!(
                "{task}\n\nRespond with a JSON object containing: {}",
                context.expected_outputs.join(", ")
            )
        }
    }

    async fn run(&self, context: StrategyContext, max_tokens: u64) -> ExecutionResult {
        let config = match precheck(StrategyType::Reasoning, &context) {
            Ok(config) => config,
            Err(rejected) => return rejected,
        };
        let Some(backend) = self.backend.as_ref() else {
            return ExecutionResult::failure(
                StrategyType::Reasoning,
                "no inference backend configured",
            );
        };

        let request = InferenceRequest {
            prompt: Self::prompt_for(&context, &config),
            context: context.inputs.clone(),
            max_tokens,
            history: Vec::new(),
        };
        let response = match backend.infer(request).await {
            Ok(response) => response,
            Err(err) => {
                return ExecutionResult::failure(
                    StrategyType::Reasoning,
                    format!("inference failed: {err}"),
                );
            }
        };

        let confidence = response
            .confidence
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        let missing: Vec<&String> = match &response.content {
            Value::Object(map) => context
                .expected_outputs
                .iter()
                .filter(|key| !map.contains_key(*key))
                .collect(),
            _ => Vec::new(),
        };

        let mut result =
            ExecutionResult::success(StrategyType::Reasoning, response.content, confidence);
        for key in missing {
            result.metadata.confidence *= 0.8;
            result = result.with_issue(format!("Expected output not produced: {key}"));
        }
        result
    }
}

#[async_trait]
impl ExecutionStrategy for ReasoningStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Reasoning
    }

    fn name(&self) -> &str {
        "reasoning"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn can_handle(&self, step_type: &str, config: Option<&StepConfig>) -> bool {
        if let Some(named) = config.and_then(StepConfig::named_strategy) {
            return named == StrategyType::Reasoning;
        }
        self.rules.matches(StrategyType::Reasoning, &[step_type])
    }

    fn estimate_resources(&self, context: &StrategyContext) -> ResourceEstimate {
        let keys = context.complexity() as u64;
        let tokens = BASE_TOKENS + TOKENS_PER_KEY * keys;
        ResourceEstimate {
            tokens,
            api_calls: 1,
            compute_time_ms: 2_000 + 250 * keys,
            cost: tokens as f64 * CREDITS_PER_TOKEN,
        }
    }

    async fn execute(&self, context: StrategyContext, cancel: CancellationToken) -> ExecutionResult {
        let estimate = self.estimate_resources(&context);
        run_guarded(
            StrategyType::Reasoning,
            &self.tracker,
            estimate,
            &cancel,
            self.run(context, estimate.tokens),
        )
        .await
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.tracker.snapshot()
    }
}
