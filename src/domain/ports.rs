use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::models::{
    ExecutionResult, PerformanceMetrics, ResourceEstimate, StepConfig, StrategyContext,
    StrategyType, SwarmExecutionInput, TierExecutionRequest,
};

/// Error type for calls leaving the process (model inference, tool calls)
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend call rejected: {0}")]
    Rejected(String),

    #[error("Backend call cancelled")]
    Cancelled,

    #[error("Unexpected backend response: {0}")]
    InvalidResponse(String),
}

/// A pluggable execution mode for a step.
///
/// Implementations must turn every failure into a structured
/// [`ExecutionResult`]; `execute` never returns an error and must observe
/// `cancel` so the governor can pause or stop in-flight work.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Cheap and side-effect free; called while scheduling.
    fn can_handle(&self, step_type: &str, config: Option<&StepConfig>) -> bool;

    /// Projected usage; grows with context complexity.
    fn estimate_resources(&self, context: &StrategyContext) -> ResourceEstimate;

    async fn execute(&self, context: StrategyContext, cancel: CancellationToken) -> ExecutionResult;

    fn performance_metrics(&self) -> PerformanceMetrics;
}

/// Request sent to a model-inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub context: Map<String, Value>,
    pub max_tokens: u64,
    /// Conversational turns preceding this request, oldest first.
    pub history: Vec<String>,
}

/// Response from a model-inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: Value,
    pub tokens_used: u64,
    /// Self-reported confidence in `[0, 1]`, when the backend provides one.
    pub confidence: Option<f64>,
}

/// Opaque, possibly slow model-inference call
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, BackendError>;
}

/// Executes a named tool (HTTP integration, sandboxed code, ...)
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, BackendError>;
}

/// Tier 1 handler; swarm goals are coordinated outside this crate.
#[async_trait]
pub trait SwarmCoordinator: Send + Sync {
    async fn coordinate(
        &self,
        request: TierExecutionRequest<SwarmExecutionInput>,
        cancel: CancellationToken,
    ) -> ExecutionResult;
}
