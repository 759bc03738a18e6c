//! Execution strategies and the registry that dispatches between them.
//!
//! Every strategy runs its body through [`run_guarded`], which is the single
//! boundary where cancellation, panics and timing are turned into a
//! structured [`ExecutionResult`] and recorded in the strategy's counters.

pub mod conversational;
pub mod deterministic;
pub mod performance;
pub mod reasoning;
pub mod registry;
pub mod routing;
pub mod rules;

pub use conversational::ConversationalStrategy;
pub use deterministic::DeterministicStrategy;
pub use performance::PerformanceTracker;
pub use reasoning::ReasoningStrategy;
pub use registry::{SelectionReason, StrategyBackends, StrategyRegistry, StrategySelection};
pub use routing::RoutingStrategy;
pub use rules::{KeywordRules, KindRules};

use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::{
    ExecutionResult, ResourceEstimate, StepConfig, StrategyContext, StrategyType,
};

/// Parse the step config and check declared required inputs.
///
/// A key counts as missing when absent or `null`.
pub(crate) fn precheck(
    strategy_type: StrategyType,
    context: &StrategyContext,
) -> Result<StepConfig, ExecutionResult> {
    let config = StepConfig::from_value(&context.config).map_err(|reason| {
        ExecutionResult::failure(strategy_type, reason.clone()).with_issue(reason)
    })?;

    let missing: Vec<String> = config
        .required_inputs
        .iter()
        .filter(|field| context.inputs.get(*field).is_none_or(Value::is_null))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(config)
    } else {
        Err(ExecutionResult::validation_failed(strategy_type, missing))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run a strategy body so that nothing escapes unstructured.
pub(crate) async fn run_guarded<F>(
    strategy_type: StrategyType,
    tracker: &PerformanceTracker,
    estimate: ResourceEstimate,
    cancel: &CancellationToken,
    body: F,
) -> ExecutionResult
where
    F: Future<Output = ExecutionResult> + Send,
{
    let started = Instant::now();

    let mut result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            ExecutionResult::failure(strategy_type, "execution cancelled")
        }
        outcome = AssertUnwindSafe(body).catch_unwind() => match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(strategy = %strategy_type, panic = %message, "strategy body panicked");
                ExecutionResult::failure(strategy_type, format!("strategy fault: {message}"))
            }
        },
    };

    if !result.success {
        result.metadata.confidence = 0.0;
    }
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    result.metadata.strategy_type = strategy_type;
    result.metadata.execution_time_ms = elapsed_ms;
    result.metadata.resource_usage = Some(estimate);
    tracker.record(&result, elapsed_ms, estimate.cost);

    debug!(
        strategy = %strategy_type,
        success = result.success,
        elapsed_ms,
        "strategy execution finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionContext;
    use serde_json::json;

    fn context(config: Value) -> StrategyContext {
        StrategyContext::new("s1", "transform", ExecutionContext::new("e", "s", "u", "c"))
            .with_input("present", json!(1))
            .with_input("empty", Value::Null)
            .with_config(config)
    }

    #[test]
    fn test_precheck_reports_missing_and_null_inputs() {
        let ctx = context(json!({"requiredInputs": ["present", "empty", "absent"]}));
        let result = precheck(StrategyType::Deterministic, &ctx).unwrap_err();
        assert!(result.is_validation_failure());
        let issues = result.feedback.unwrap().issues;
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("empty"));
        assert!(issues[1].contains("absent"));
    }

    #[test]
    fn test_precheck_rejects_null_config() {
        let result = precheck(StrategyType::Reasoning, &context(Value::Null)).unwrap_err();
        assert!(!result.success);
        assert_eq!(result.metadata.confidence, 0.0);
        assert!(result.error.unwrap().contains("malformed context"));
    }

    #[tokio::test]
    async fn test_run_guarded_converts_panics() {
        let tracker = PerformanceTracker::new(1_000.0);
        let cancel = CancellationToken::new();
        let result = run_guarded(
            StrategyType::Deterministic,
            &tracker,
            ResourceEstimate::default(),
            &cancel,
            async {
                if cancel.is_cancelled() {
                    return ExecutionResult::failure(StrategyType::Deterministic, "cancelled");
                }
                panic!("kaboom")
            },
        )
        .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("kaboom"));
        assert_eq!(tracker.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_run_guarded_observes_cancellation() {
        let tracker = PerformanceTracker::new(1_000.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_guarded(
            StrategyType::Reasoning,
            &tracker,
            ResourceEstimate::default(),
            &cancel,
            std::future::pending(),
        )
        .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("cancelled"));
    }
}
