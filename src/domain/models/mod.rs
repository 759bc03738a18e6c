pub mod config;
pub mod context;
pub mod event;
pub mod limits;
pub mod strategy;
pub mod task;
pub mod tier_input;

pub use config::{
    Config, DispatchConfig, HistoryConfig, KeywordRule, KindRule, LoggingConfig, MonitorConfig,
    QueuesConfig,
};
pub use context::{ExecutionContext, ResourceAllocation, TierExecutionRequest};
pub use event::{event_types, Tier, TierEvent};
pub use limits::{ActiveTaskRegistryLimits, LongRunningPolicy};
pub use strategy::{
    ExecutionFeedback, ExecutionKind, ExecutionMetadata, ExecutionResult, PerformanceMetrics,
    ResourceEstimate, RouteRule, StepConfig, StrategyContext, StrategyType, TransformOp,
    TransformRule,
};
pub use task::{ActiveTaskRecord, QueueClass, RetryState, TaskState};
pub use tier_input::{
    RoutineExecutionInput, StepDependency, StepExecutionInput, SwarmExecutionConfig,
    SwarmExecutionInput, TeamConfiguration, TierInput, TierKind, ToolDescriptor, Workflow,
    WorkflowStep,
};
