//! Declarative routing: pick a target from `config.routes`.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::performance::PerformanceTracker;
use super::rules::KeywordRules;
use super::{precheck, run_guarded};
use crate::domain::models::{
    ExecutionResult, PerformanceMetrics, ResourceEstimate, RouteRule, StepConfig,
    StrategyContext, StrategyType,
};
use crate::domain::ports::ExecutionStrategy;

const MATCH_CONFIDENCE: f64 = 1.0;
const FALLBACK_CONFIDENCE: f64 = 0.6;

pub struct RoutingStrategy {
    rules: KeywordRules,
    tracker: PerformanceTracker,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::new(KeywordRules::default())
    }
}

impl RoutingStrategy {
    pub fn new(rules: KeywordRules) -> Self {
        Self {
            rules,
            tracker: PerformanceTracker::new(100.0),
        }
    }

    /// First route whose field equals its expected value.
    pub fn choose<'a>(context: &StrategyContext, routes: &'a [RouteRule]) -> Option<&'a RouteRule> {
        routes
            .iter()
            .find(|route| context.inputs.get(&route.field) == Some(&route.equals))
    }

    fn route(context: &StrategyContext, config: &StepConfig) -> ExecutionResult {
        if let Some(route) = Self::choose(context, &config.routes) {
            return ExecutionResult::success(
                StrategyType::Routing,
                json!({"route": route.target, "matchedField": route.field}),
                MATCH_CONFIDENCE,
            );
        }
        match &config.default_route {
            Some(target) => ExecutionResult::success(
                StrategyType::Routing,
                json!({"route": target, "matchedField": null}),
                FALLBACK_CONFIDENCE,
            )
            .with_issue("No route matched; used default route"),
            None => ExecutionResult::failure(
                StrategyType::Routing,
                format!(
                    "no route matched step '{}' and no default route is configured",
                    context.step_id
                ),
            ),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for RoutingStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Routing
    }

    fn name(&self) -> &str {
        "routing"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn can_handle(&self, step_type: &str, config: Option<&StepConfig>) -> bool {
        if let Some(config) = config {
            if let Some(named) = config.named_strategy() {
                return named == StrategyType::Routing;
            }
            if !config.routes.is_empty() {
                return true;
            }
        }
        self.rules.matches(StrategyType::Routing, &[step_type])
    }

    fn estimate_resources(&self, context: &StrategyContext) -> ResourceEstimate {
        let routes = context.step_config().map_or(0, |c| c.routes.len()) as u64;
        let keys = context.complexity() as u64;
        ResourceEstimate {
            tokens: 0,
            api_calls: 0,
            compute_time_ms: 5 + routes + keys,
            cost: 0.000_2 + 0.000_1 * (routes + keys) as f64,
        }
    }

    async fn execute(&self, context: StrategyContext, cancel: CancellationToken) -> ExecutionResult {
        let estimate = self.estimate_resources(&context);
        run_guarded(
            StrategyType::Routing,
            &self.tracker,
            estimate,
            &cancel,
            async move {
                match precheck(StrategyType::Routing, &context) {
                    Ok(config) => Self::route(&context, &config),
                    Err(rejected) => rejected,
                }
            },
        )
        .await
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.tracker.snapshot()
    }
}
