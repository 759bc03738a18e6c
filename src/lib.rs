//! swarmgate - governance core for tiered AI-task execution
//!
//! Requests arrive as untyped JSON at one of three tiers (swarm
//! coordination, routine processes, individual steps). swarmgate validates
//! them at the boundary, picks an execution strategy, gates admission per
//! queue class, enforces long-running and timeout policy, and records every
//! transition in a bounded rolling history that an emergent-pattern monitor
//! analyses.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, invariants and ports
//! - **Service Layer** (`services`): validator, strategies, admission governor,
//!   rolling history, emergent monitor, dependency resolver
//! - **Application Layer** (`application`): the tier executor that wires the
//!   services into one request flow
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): inspection commands
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarmgate::application::TierExecutor;
//! use swarmgate::domain::models::Config;
//! use swarmgate::services::{
//!     ActiveTaskRegistry, RollingHistory, StrategyBackends, StrategyRegistry, TierInputValidator,
//! };
//!
//! # async fn run(request: serde_json::Value) -> anyhow::Result<()> {
//! let config = Config::default();
//! let history = Arc::new(RollingHistory::from_config(&config.history));
//! let governor = Arc::new(ActiveTaskRegistry::new(&config.queues)?.with_history(Arc::clone(&history)));
//! let strategies = Arc::new(StrategyRegistry::with_builtin(&config.dispatch, &StrategyBackends::default()));
//!
//! let executor = TierExecutor::new(
//!     TierInputValidator::new(config.dispatch.tier_order.clone()),
//!     strategies,
//!     governor,
//! )
//! .with_history(history);
//!
//! let submission = executor.submit(&request).await?;
//! println!("{}", submission.completion.label());
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Submission, SubmitError, TaskCompletion, TierExecutor};
pub use domain::models::{
    ActiveTaskRegistryLimits, Config, ExecutionContext, ExecutionResult, QueueClass,
    ResourceAllocation, StrategyType, Tier, TierEvent, TierExecutionRequest, TierInput, TierKind,
};
pub use domain::ports::{ExecutionStrategy, InferenceBackend, SwarmCoordinator, ToolInvoker};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ActiveTaskRegistry, AdmissionRejection, AdmissionRequest, DependencyResolver,
    EmergentMonitor, PatternReport, RollingHistory, StrategyRegistry, TierInputValidator,
    ValidationRejection,
};
