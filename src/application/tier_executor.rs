//! End-to-end request handling across the tier boundary.
//!
//! A raw request is validated, planned (strategy selection and cost
//! estimate), admitted by the governor, executed against the governor's
//! deadline and cancellation token, and finally released. Every stage leaves
//! a trace in the rolling history when one is attached.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::{
    event_types, ExecutionContext, ExecutionResult, QueueClass, ResourceEstimate,
    StrategyContext, StrategyType, SwarmExecutionInput, Tier, TierEvent, TierExecutionRequest,
    TierInput, TierKind, Workflow,
};
use crate::domain::ports::SwarmCoordinator;
use crate::domain::DomainError;
use crate::services::strategies::StrategySelection;
use crate::services::{
    ActiveTaskRegistry, AdmissionRejection, AdmissionRequest, AdmissionTicket,
    DependencyResolver, RollingHistory, StrategyRegistry, TerminalOutcome, TierInputValidator,
    ValidationRejection,
};

const COMPONENT: &str = "tier_executor";

/// Step parameter holding the step's own configuration object.
pub const CONFIG_PARAMETER: &str = "config";

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How an admitted task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskCompletion {
    /// The work ran to completion; success or failure is in the result.
    Finished(ExecutionResult),
    /// The governor deadline passed first, possibly while paused.
    TimedOut,
    /// Stopped as long-running, or force-terminated at shutdown. The retry
    /// state stays in the governor's ledger.
    Stopped,
    /// Cancelled from outside the executor.
    Cancelled,
}

impl TaskCompletion {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished(result) if result.success)
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Finished(result) => Some(result),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Finished(result) if result.success => "completed",
            Self::Finished(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one accepted submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task_id: Uuid,
    pub tier: TierKind,
    pub estimate: ResourceEstimate,
    pub completion: TaskCompletion,
    /// Times the task was paused and resumed; each resume restarts the work.
    pub resumed: u32,
}

/// Why a request never started executing.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Request rejected at the boundary: {0}")]
    Validation(#[from] ValidationRejection),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionRejection),

    #[error("Estimated cost {estimated:.4} exceeds the allocation of {max_credits} credits")]
    BudgetExceeded { estimated: f64, max_credits: String },

    #[error("No strategy can handle step '{0}'")]
    NoStrategy(String),

    #[error("No swarm coordinator is configured")]
    NoCoordinator,

    #[error("Invalid routine workflow: {0}")]
    Workflow(#[from] DomainError),
}

/// A step with its strategy already chosen.
#[derive(Clone)]
struct PlannedStep {
    context: StrategyContext,
    selection: StrategySelection,
}

#[derive(Clone)]
enum Plan {
    Step(PlannedStep),
    Routine {
        routine_id: String,
        steps: Vec<PlannedStep>,
    },
    Swarm(TierExecutionRequest<SwarmExecutionInput>),
}

impl Plan {
    fn estimate(&self) -> ResourceEstimate {
        let steps: &[PlannedStep] = match self {
            Self::Step(step) => std::slice::from_ref(step),
            Self::Routine { steps, .. } => steps,
            Self::Swarm(_) => &[],
        };
        steps
            .iter()
            .map(|s| s.selection.estimate)
            .fold(ResourceEstimate::default(), |acc, e| ResourceEstimate {
                tokens: acc.tokens + e.tokens,
                api_calls: acc.api_calls + e.api_calls,
                compute_time_ms: acc.compute_time_ms + e.compute_time_ms,
                cost: acc.cost + e.cost,
            })
    }
}

/// Split step parameters into strategy inputs and step config.
///
/// A `config` object parameter becomes the step config; the declared
/// strategy and tool fill in whatever it leaves unset.
fn build_context(
    execution: ExecutionContext,
    step_id: &str,
    step_type: &str,
    parameters: &Map<String, Value>,
    strategy: &str,
    tool_name: Option<&str>,
) -> StrategyContext {
    let mut inputs = parameters.clone();
    let mut config = match inputs.remove(CONFIG_PARAMETER) {
        Some(Value::Object(config)) => config,
        Some(other) => {
            // Not ours; hand it back to the strategy as a plain input.
            inputs.insert(CONFIG_PARAMETER.to_string(), other);
            Map::new()
        }
        None => Map::new(),
    };
    if !strategy.trim().is_empty() {
        config
            .entry("strategy")
            .or_insert_with(|| Value::String(strategy.to_string()));
    }
    if let Some(tool) = tool_name {
        config
            .entry("toolName")
            .or_insert_with(|| Value::String(tool.to_string()));
    }

    let mut context = StrategyContext::new(step_id, step_type, execution);
    context.inputs = inputs;
    context.config = Value::Object(config);
    context
}

/// Stable task id for an execution: the execution id itself when it is a
/// UUID, otherwise a name-based UUID derived from it. Resubmitting the same
/// execution therefore hits the same retry ledger.
pub fn task_id_for(execution_id: &str) -> Uuid {
    Uuid::parse_str(execution_id)
        .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, execution_id.as_bytes()))
}

fn error_type(result: &ExecutionResult) -> &'static str {
    if result.is_validation_failure() {
        "validation_failed"
    } else if result
        .error
        .as_deref()
        .is_some_and(|e| e.to_lowercase().contains("cancel"))
    {
        "cancelled"
    } else {
        "execution_failed"
    }
}

pub struct TierExecutor {
    validator: TierInputValidator,
    strategies: Arc<StrategyRegistry>,
    governor: Arc<ActiveTaskRegistry>,
    history: Option<Arc<RollingHistory>>,
    coordinator: Option<Arc<dyn SwarmCoordinator>>,
    resolver: DependencyResolver,
    premium_users: HashSet<String>,
}

impl TierExecutor {
    pub fn new(
        validator: TierInputValidator,
        strategies: Arc<StrategyRegistry>,
        governor: Arc<ActiveTaskRegistry>,
    ) -> Self {
        Self {
            validator,
            strategies,
            governor,
            history: None,
            coordinator: None,
            resolver: DependencyResolver::new(),
            premium_users: HashSet::new(),
        }
    }

    pub fn with_history(mut self, history: Arc<RollingHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<dyn SwarmCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Users whose tasks get the premium long-running threshold.
    pub fn with_premium_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.premium_users.extend(users.into_iter().map(Into::into));
        self
    }

    pub fn governor(&self) -> &Arc<ActiveTaskRegistry> {
        &self.governor
    }

    pub fn is_premium(&self, user_id: &str) -> bool {
        self.premium_users.contains(user_id)
    }

    fn record(&self, event: TierEvent) {
        if let Some(history) = &self.history {
            history.append(event);
        }
    }

    /// Validate, admit and run one request.
    ///
    /// `Err` means the request never held an admission slot. Once admitted,
    /// every outcome (including timeouts and governor cancellation) is an
    /// `Ok` [`Submission`] and the slot has been released or handed to the
    /// governor. A governor pause does not end the submission: it waits for
    /// the resume and runs the plan again under the new token.
    #[instrument(skip(self, raw))]
    pub async fn submit(&self, raw: &Value) -> Result<Submission, SubmitError> {
        let request = self.validator.validate_request(raw)?;
        let tier = request.input.kind();
        let queue = QueueClass::from(tier);
        let plan = self.plan(request.clone())?;
        let estimate = plan.estimate();

        if let Some(max_credits) = request.allocation.credits_as_f64() {
            if estimate.cost > max_credits {
                warn!(
                    execution_id = %request.context.execution_id,
                    estimated = estimate.cost,
                    max_credits,
                    "estimate exceeds allocation"
                );
                self.record(TierEvent::new(
                    event_types::RESOURCE_EXHAUSTED,
                    Tier::from(queue),
                    COMPONENT,
                    json!({
                        "executionId": request.context.execution_id,
                        "credits": estimate.cost,
                        "maxCredits": request.allocation.max_credits,
                    }),
                ));
                return Err(SubmitError::BudgetExceeded {
                    estimated: estimate.cost,
                    max_credits: request.allocation.max_credits.clone(),
                });
            }
        }

        let task_id = task_id_for(&request.context.execution_id);
        let ticket = self.governor.admit(
            AdmissionRequest::new(task_id, queue)
                .premium(self.is_premium(&request.context.user_id))
                .with_max_duration_ms(request.allocation.max_duration_ms)
                .with_estimated_cost(estimate.cost),
        )?;
        self.governor.mark_running(task_id);
        self.record(TierEvent::new(
            event_types::RESOURCE_ALLOCATED,
            Tier::from(queue),
            tier.as_str(),
            json!({
                "taskId": task_id,
                "executionId": request.context.execution_id,
                "credits": estimate.cost,
                "maxCredits": request.allocation.max_credits,
            }),
        ));

        let (completion, resumed) = self.drive(&plan, ticket).await;
        self.settle(task_id, &completion);

        info!(
            task_id = %task_id,
            tier = %tier,
            outcome = completion.label(),
            resumed,
            "submission finished"
        );
        Ok(Submission {
            task_id,
            tier,
            estimate,
            completion,
            resumed,
        })
    }

    /// Run the plan until it finishes or the governor ends it, waiting out
    /// pauses. Returns the completion and the number of resumes.
    async fn drive(&self, plan: &Plan, mut ticket: AdmissionTicket) -> (TaskCompletion, u32) {
        let mut resumed = 0;
        loop {
            let work = self.run(plan.clone(), ticket.cancel.clone());
            if let Some(completion) = self.race(&ticket, work).await {
                return (completion, resumed);
            }

            // Token pulled: a pause keeps the record, anything else drops it.
            let next = tokio::select! {
                biased;
                next = self.governor.resumed(ticket.task_id) => next,
                () = sleep_until(ticket.deadline) => return (TaskCompletion::TimedOut, resumed),
            };
            match next {
                Some(next) => {
                    resumed += 1;
                    debug!(task_id = %ticket.task_id, resumed, "restarting resumed task");
                    ticket = next;
                }
                None => return (self.interruption(&ticket), resumed),
            }
        }
    }

    /// `None` when the governor pulled the token; a transition wins over a
    /// result produced in the same poll.
    async fn race<F>(&self, ticket: &AdmissionTicket, work: F) -> Option<TaskCompletion>
    where
        F: Future<Output = ExecutionResult>,
    {
        tokio::select! {
            biased;
            () = ticket.cancel.cancelled() => None,
            () = sleep_until(ticket.deadline) => Some(TaskCompletion::TimedOut),
            result = work => Some(TaskCompletion::Finished(result)),
        }
    }

    /// Why a task left the governor while its work was interrupted.
    fn interruption(&self, ticket: &AdmissionTicket) -> TaskCompletion {
        if self.governor.retry_ledger(ticket.task_id).is_some() {
            TaskCompletion::Stopped
        } else if Instant::now() >= ticket.deadline {
            TaskCompletion::TimedOut
        } else {
            TaskCompletion::Cancelled
        }
    }

    fn settle(&self, task_id: Uuid, completion: &TaskCompletion) {
        match completion {
            TaskCompletion::Finished(result) => {
                let outcome = if result.success {
                    TerminalOutcome::Completed
                } else {
                    TerminalOutcome::Failed
                };
                self.governor.complete(task_id, outcome);
            }
            TaskCompletion::TimedOut => {
                let outcome = self.governor.enforce_timeout(task_id);
                debug!(task_id = %task_id, outcome = ?outcome, "deadline reached");
            }
            // The governor already released the record.
            TaskCompletion::Stopped | TaskCompletion::Cancelled => {}
        }
    }

    fn plan(&self, request: TierExecutionRequest<TierInput>) -> Result<Plan, SubmitError> {
        let TierExecutionRequest {
            context,
            input,
            allocation,
        } = request;

        match input {
            TierInput::Step(step) => {
                let strategy_context = build_context(
                    context.with_step(step.step_id.as_str()),
                    &step.step_id,
                    &step.step_type,
                    &step.parameters,
                    &step.strategy,
                    step.tool_name.as_deref(),
                );
                Ok(Plan::Step(self.select(strategy_context)?))
            }
            TierInput::Routine(routine) => {
                let root = context.with_routine(routine.routine_id.as_str());
                let steps = match &routine.workflow {
                    Some(workflow) => self.plan_workflow(&root, workflow, &routine.parameters)?,
                    None => {
                        let strategy_context = build_context(
                            root.child(format!("{}/{}", root.execution_id, routine.routine_id)),
                            &routine.routine_id,
                            &routine.routine_id,
                            &routine.parameters,
                            "",
                            None,
                        );
                        vec![self.select(strategy_context)?]
                    }
                };
                Ok(Plan::Routine {
                    routine_id: routine.routine_id,
                    steps,
                })
            }
            TierInput::Swarm(swarm) => Ok(Plan::Swarm(TierExecutionRequest {
                context,
                input: swarm,
                allocation,
            })),
        }
    }

    /// Steps in dependency order; routine parameters are shared inputs that
    /// step parameters override.
    fn plan_workflow(
        &self,
        root: &ExecutionContext,
        workflow: &Workflow,
        shared: &Map<String, Value>,
    ) -> Result<Vec<PlannedStep>, SubmitError> {
        if workflow.steps.is_empty() {
            return Err(DomainError::ValidationFailed("routine workflow has no steps".to_string()).into());
        }
        self.resolver
            .execution_order(workflow)?
            .into_iter()
            .map(|step| {
                let mut parameters = shared.clone();
                parameters.extend(step.parameters.clone());
                let execution = root
                    .child(format!("{}/{}", root.execution_id, step.id))
                    .with_step(step.id.as_str());
                let mut context = build_context(
                    execution,
                    &step.id,
                    &step.name,
                    &parameters,
                    &step.strategy,
                    Some(step.tool_name.as_str()),
                );
                context.description = Some(step.name.clone());
                self.select(context)
            })
            .collect()
    }

    fn select(&self, context: StrategyContext) -> Result<PlannedStep, SubmitError> {
        let selection = self
            .strategies
            .select(&context)
            .ok_or_else(|| SubmitError::NoStrategy(context.step_id.clone()))?;
        debug!(
            step_id = %context.step_id,
            strategy = %selection.strategy.strategy_type(),
            reason = %selection.reason,
            cost = selection.estimate.cost,
            "strategy selected"
        );
        Ok(PlannedStep { context, selection })
    }

    async fn run(&self, plan: Plan, cancel: CancellationToken) -> ExecutionResult {
        match plan {
            Plan::Step(step) => self.run_step(step, Tier::Execution, cancel).await,
            Plan::Routine { routine_id, steps } => self.run_routine(&routine_id, steps, cancel).await,
            Plan::Swarm(request) => self.run_swarm(request, cancel).await,
        }
    }

    async fn run_step(&self, step: PlannedStep, tier: Tier, cancel: CancellationToken) -> ExecutionResult {
        let PlannedStep { context, selection } = step;
        let strategy = selection.strategy.strategy_type();
        let step_id = context.step_id.clone();

        self.record(TierEvent::new(
            event_types::STRATEGY_SELECTED,
            tier,
            COMPONENT,
            json!({
                "strategy": strategy,
                "stepId": step_id,
                "reason": selection.reason.as_str(),
                "estimatedCost": selection.estimate.cost,
            }),
        ));
        self.record(TierEvent::new(
            event_types::STEP_STARTED,
            tier,
            strategy.as_str(),
            json!({"strategy": strategy, "stepId": step_id}),
        ));

        let started = Instant::now();
        let result = selection.strategy.execute(context, cancel).await;
        let duration_ms = millis(started.elapsed());

        self.record(TierEvent::new(
            event_types::STEP_COMPLETED,
            tier,
            strategy.as_str(),
            json!({
                "strategy": strategy,
                "stepId": step_id,
                "success": result.success,
                "durationMs": duration_ms,
                "confidence": result.metadata.confidence,
            }),
        ));
        if !result.success {
            warn!(step_id = %step_id, strategy = %strategy, error = ?result.error, "step failed");
            self.record(TierEvent::new(
                event_types::STEP_FAILED,
                tier,
                strategy.as_str(),
                json!({
                    "strategy": strategy,
                    "stepId": step_id,
                    "errorType": error_type(&result),
                    "error": result.error,
                }),
            ));
        }
        result
    }

    /// Steps run one after another; each sees the results of the steps
    /// before it under their step ids. The first failure ends the routine.
    async fn run_routine(
        &self,
        routine_id: &str,
        steps: Vec<PlannedStep>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let total = steps.len();
        let mut outputs = Map::new();
        let mut confidence = 1.0_f64;
        let mut usage = ResourceEstimate::default();
        let mut last = None;

        for mut step in steps {
            for (id, output) in &outputs {
                step.context
                    .inputs
                    .entry(id.clone())
                    .or_insert_with(|| output.clone());
            }
            let step_id = step.context.step_id.clone();
            let estimate = step.selection.estimate;
            let result = self.run_step(step, Tier::Process, cancel.clone()).await;
            usage.tokens += estimate.tokens;
            usage.api_calls += estimate.api_calls;
            usage.compute_time_ms += estimate.compute_time_ms;
            usage.cost += estimate.cost;

            if !result.success {
                let error = format!(
                    "Step '{step_id}' failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                self.record(TierEvent::new(
                    event_types::ROUTINE_FAILED,
                    Tier::Process,
                    COMPONENT,
                    json!({
                        "routineId": routine_id,
                        "stepId": step_id,
                        "durationMs": millis(started.elapsed()),
                    }),
                ));
                let mut failed = ExecutionResult::failure(result.metadata.strategy_type, error);
                failed.feedback = result.feedback;
                failed.metadata.execution_time_ms = millis(started.elapsed());
                failed.metadata.resource_usage = Some(usage);
                return failed;
            }

            confidence = confidence.min(result.metadata.confidence);
            outputs.insert(step_id, result.result.clone().unwrap_or(Value::Null));
            last = Some(result);
        }

        let duration_ms = millis(started.elapsed());
        self.record(TierEvent::new(
            event_types::ROUTINE_COMPLETED,
            Tier::Process,
            COMPONENT,
            json!({
                "routineId": routine_id,
                "steps": total,
                "success": true,
                "durationMs": duration_ms,
            }),
        ));

        let strategy_type = last.map_or(StrategyType::Deterministic, |r| r.metadata.strategy_type);
        let mut result = ExecutionResult::success(strategy_type, Value::Object(outputs), confidence);
        result.metadata.execution_time_ms = duration_ms;
        result.metadata.resource_usage = Some(usage);
        result
    }

    async fn run_swarm(
        &self,
        request: TierExecutionRequest<SwarmExecutionInput>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let Some(coordinator) = &self.coordinator else {
            return ExecutionResult::failure(
                StrategyType::Reasoning,
                SubmitError::NoCoordinator.to_string(),
            );
        };
        let swarm_id = request.context.swarm_id.clone();
        let started = Instant::now();
        let result = coordinator.coordinate(request, cancel).await;
        let mut data = json!({
            "swarmId": swarm_id,
            "success": result.success,
            "durationMs": millis(started.elapsed()),
        });
        let event_type = if result.success {
            event_types::SWARM_COMPLETED
        } else {
            data["errorType"] = json!("swarm_failed");
            event_types::SWARM_FAILED
        };
        self.record(TierEvent::new(event_type, Tier::Coordination, COMPONENT, data));
        result
    }
}
