//! Multi-turn conversational steps.

use async_trait::async_trait;
use serde_json::{json, Value};
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

const DEFAULT_CONFIDENCE: f64 = 0.7;
const BASE_TOKENS: u64 = 400;
const TOKENS_PER_KEY: u64 = 100;
const TOKENS_PER_TURN: u64 = 150;
const CREDITS_PER_TOKEN: f64 = 0.000_015;

/// Input key holding the prior turns, oldest first.
pub const HISTORY_INPUT: &str = "history";
/// Input key holding the user's latest message.
pub const MESSAGE_INPUT: &str = "message";

fn turns(context: &StrategyContext) -> Vec<String> {
    context
        .inputs
        .get(HISTORY_INPUT)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|turn| match turn {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct ConversationalStrategy {
    rules: KeywordRules,
    backend: Option<Arc<dyn InferenceBackend>>,
    tracker: PerformanceTracker,
}

impl Default for ConversationalStrategy {
    fn default() -> Self {
        Self::new(KeywordRules::default())
    }
}

impl ConversationalStrategy {
    pub fn new(rules: KeywordRules) -> Self {
        Self {
            rules,
            backend: None,
            tracker: PerformanceTracker::new(10_000.0),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    async fn run(&self, context: StrategyContext, max_tokens: u64) -> ExecutionResult {
        let config = match precheck(StrategyType::Conversational, &context) {
            Ok(config) => config,
            Err(rejected) => return rejected,
        };
        let Some(backend) = self.backend.as_ref() else {
            return ExecutionResult::failure(
                StrategyType::Conversational,
                "no inference backend configured",
            );
        };

        let message = context
            .inputs
            .get(MESSAGE_INPUT)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(config.prompt)
            .or_else(|| context.description.clone());
        let Some(message) = message else {
            return ExecutionResult::failure(
                StrategyType::Conversational,
                "conversation step has no message to respond to",
            )
            .with_issue(format!("Missing required input: {MESSAGE_INPUT}"));
        };

        let history = turns(&context);
        let mut extra = context.inputs.clone();
        extra.remove(HISTORY_INPUT);
        extra.remove(MESSAGE_INPUT);

        let request = InferenceRequest {
            prompt: message,
            context: extra,
            max_tokens,
            history: history.clone(),
        };
        match backend.infer(request).await {
            Ok(response) => {
                let reply = match response.content {
                    Value::Object(mut map) => match map.remove("reply") {
                        Some(reply) => reply,
                        None => Value::Object(map),
                    },
                    other => other,
                };
                let confidence = response
                    .confidence
                    .unwrap_or(DEFAULT_CONFIDENCE)
                    .clamp(0.0, 1.0);
                ExecutionResult::success(
                    StrategyType::Conversational,
                    json!({"reply": reply, "turn": history.len() + 1}),
                    confidence,
                )
            }
            Err(err) => ExecutionResult::failure(
                StrategyType::Conversational,
                format!("inference failed: {err}"),
            ),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for ConversationalStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Conversational
    }

    fn name(&self) -> &str {
        "conversational"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn can_handle(&self, step_type: &str, config: Option<&StepConfig>) -> bool {
        if let Some(named) = config.and_then(StepConfig::named_strategy) {
            return named == StrategyType::Conversational;
        }
        self.rules.matches(StrategyType::Conversational, &[step_type])
    }

    fn estimate_resources(&self, context: &StrategyContext) -> ResourceEstimate {
        let keys = context.complexity() as u64;
        let prior = turns(context).len() as u64;
        let tokens = BASE_TOKENS + TOKENS_PER_KEY * keys + TOKENS_PER_TURN * prior;
        ResourceEstimate {
            tokens,
            api_calls: 1,
            compute_time_ms: 1_000 + 100 * keys + 50 * prior,
            cost: tokens as f64 * CREDITS_PER_TOKEN,
        }
    }

    async fn execute(&self, context: StrategyContext, cancel: CancellationToken) -> ExecutionResult {
        let estimate = self.estimate_resources(&context);
        run_guarded(
            StrategyType::Conversational,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionContext;
    use crate::domain::ports::{BackendError, InferenceResponse};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<InferenceRequest>>,
    }

    #[async_trait]
    impl InferenceBackend for RecordingBackend {
        async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, BackendError> {
            let reply = format!("re: {}", request.prompt);
            self.seen.lock().push(request);
            Ok(InferenceResponse {
                content: Value::String(reply),
                tokens_used: 10,
                confidence: None,
            })
        }
    }

    fn ctx() -> StrategyContext {
        StrategyContext::new("turn", "chat_reply", ExecutionContext::new("e", "s", "u", "c"))
    }

    #[tokio::test]
    async fn test_passes_history_and_message() {
        let backend = Arc::new(RecordingBackend::default());
        let strategy = ConversationalStrategy::default().with_backend(backend.clone());
        let context = ctx()
            .with_input(MESSAGE_INPUT, json!("hello"))
            .with_input(HISTORY_INPUT, json!(["hi", "how can I help?"]))
            .with_input("locale", json!("en"));

        let result = strategy.execute(context, CancellationToken::new()).await;
        assert!(result.success);
        let out = result.result.unwrap();
        assert_eq!(out["reply"], "re: hello");
        assert_eq!(out["turn"], 3);
        assert!((result.metadata.confidence - DEFAULT_CONFIDENCE).abs() < 1e-9);

        let seen = backend.seen.lock();
        assert_eq!(seen[0].history.len(), 2);
        assert!(seen[0].context.contains_key("locale"));
        assert!(!seen[0].context.contains_key(HISTORY_INPUT));
    }

    #[tokio::test]
    async fn test_no_message_is_failure() {
        let strategy =
            ConversationalStrategy::default().with_backend(Arc::new(RecordingBackend::default()));
        let result = strategy.execute(ctx(), CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.feedback.is_some());
    }

    #[test]
    fn test_longer_history_costs_more() {
        let strategy = ConversationalStrategy::default();
        let short = ctx().with_input(HISTORY_INPUT, json!(["a"]));
        let long = ctx().with_input(HISTORY_INPUT, json!(["a", "b", "c", "d"]));
        assert!(strategy.estimate_resources(&long).cost > strategy.estimate_resources(&short).cost);
    }
}
