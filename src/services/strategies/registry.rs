//! Priority-ordered strategy registry.
//!
//! Providers are queried in registration order. An explicit strategy name in
//! the step config wins; otherwise the first provider that claims the step is
//! chosen, and reasoning is the fallback for anything unclaimed.

use std::fmt;
use std::sync::Arc;

use super::{
    ConversationalStrategy, DeterministicStrategy, KeywordRules, KindRules, ReasoningStrategy,
    RoutingStrategy,
};
use crate::domain::models::{
    DispatchConfig, PerformanceMetrics, ResourceEstimate, StepConfig, StrategyContext,
    StrategyType,
};
use crate::domain::ports::{ExecutionStrategy, InferenceBackend, ToolInvoker};

/// Why a strategy was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    Explicit,
    Matched,
    Fallback,
    Cheapest,
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Matched => "matched",
            Self::Fallback => "fallback",
            Self::Cheapest => "cheapest",
        }
    }
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct StrategySelection {
    pub strategy: Arc<dyn ExecutionStrategy>,
    pub reason: SelectionReason,
    pub estimate: ResourceEstimate,
}

impl fmt::Debug for StrategySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySelection")
            .field("strategy", &self.strategy.strategy_type())
            .field("reason", &self.reason)
            .field("estimate", &self.estimate)
            .finish()
    }
}

/// External collaborators handed to the built-in strategies.
#[derive(Clone, Default)]
pub struct StrategyBackends {
    pub inference: Option<Arc<dyn InferenceBackend>>,
    pub tools: Option<Arc<dyn ToolInvoker>>,
}

pub struct StrategyRegistry {
    providers: Vec<Arc<dyn ExecutionStrategy>>,
    fallback: Option<StrategyType>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            fallback: Some(StrategyType::Reasoning),
        }
    }

    /// The four built-in strategies, cheapest first.
    pub fn with_builtin(dispatch: &DispatchConfig, backends: &StrategyBackends) -> Self {
        let rules = KeywordRules::new(dispatch.strategy_rules.clone());
        let kinds = KindRules::new(dispatch.kind_rules.clone());

        let mut deterministic = DeterministicStrategy::new(rules.clone(), kinds);
        let mut reasoning = ReasoningStrategy::new(rules.clone());
        let mut conversational = ConversationalStrategy::new(rules.clone());
        if let Some(tools) = &backends.tools {
            deterministic = deterministic.with_tools(Arc::clone(tools));
        }
        if let Some(inference) = &backends.inference {
            reasoning = reasoning.with_backend(Arc::clone(inference));
            conversational = conversational.with_backend(Arc::clone(inference));
        }

        let mut registry = Self::new();
        registry.register(Arc::new(deterministic));
        registry.register(Arc::new(RoutingStrategy::new(rules)));
        registry.register(Arc::new(conversational));
        registry.register(Arc::new(reasoning));
        registry
    }

    /// Append a provider, replacing any already registered for the same type
    /// in place so priority is preserved.
    pub fn register(&mut self, strategy: Arc<dyn ExecutionStrategy>) {
        let kind = strategy.strategy_type();
        match self.providers.iter_mut().find(|p| p.strategy_type() == kind) {
            Some(slot) => *slot = strategy,
            None => self.providers.push(strategy),
        }
    }

    pub fn set_fallback(&mut self, fallback: Option<StrategyType>) {
        self.fallback = fallback;
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<Arc<dyn ExecutionStrategy>> {
        self.providers
            .iter()
            .find(|p| p.strategy_type() == strategy_type)
            .cloned()
    }

    pub fn strategy_types(&self) -> Vec<StrategyType> {
        self.providers.iter().map(|p| p.strategy_type()).collect()
    }

    fn selection(
        &self,
        strategy: &Arc<dyn ExecutionStrategy>,
        reason: SelectionReason,
        context: &StrategyContext,
    ) -> StrategySelection {
        StrategySelection {
            strategy: Arc::clone(strategy),
            reason,
            estimate: strategy.estimate_resources(context),
        }
    }

    pub fn select(&self, context: &StrategyContext) -> Option<StrategySelection> {
        let config = context.step_config();

        if let Some(named) = config.as_ref().and_then(StepConfig::named_strategy) {
            if let Some(strategy) = self.providers.iter().find(|p| p.strategy_type() == named) {
                return Some(self.selection(strategy, SelectionReason::Explicit, context));
            }
        }

        if let Some(strategy) = self
            .providers
            .iter()
            .find(|p| p.can_handle(&context.step_type, config.as_ref()))
        {
            return Some(self.selection(strategy, SelectionReason::Matched, context));
        }

        let fallback = self.fallback?;
        self.providers
            .iter()
            .find(|p| p.strategy_type() == fallback)
            .map(|strategy| self.selection(strategy, SelectionReason::Fallback, context))
    }

    /// Cheapest provider that claims the step.
    pub fn select_cheapest(&self, context: &StrategyContext) -> Option<StrategySelection> {
        let config = context.step_config();
        self.providers
            .iter()
            .filter(|p| p.can_handle(&context.step_type, config.as_ref()))
            .map(|p| self.selection(p, SelectionReason::Cheapest, context))
            .min_by(|a, b| a.estimate.cost.total_cmp(&b.estimate.cost))
    }

    pub fn metrics(&self) -> Vec<(StrategyType, PerformanceMetrics)> {
        self.providers
            .iter()
            .map(|p| (p.strategy_type(), p.performance_metrics()))
            .collect()
    }
}
