//! Active task registry and admission governor.
//!
//! Gates admission per queue class, tracks every admitted task and is the
//! only authority on timeout deadlines and long-running escalation. Each
//! queue class owns one mutex; every read-then-write of its counters
//! (admit, complete, cancel, pause, resume, stop, timeout) happens under it.
//! Signals are emitted after the lock is released.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    event_types, ActiveTaskRecord, ActiveTaskRegistryLimits, LongRunningPolicy, QueueClass,
    QueuesConfig, RetryState, TaskState, Tier, TierEvent,
};
use crate::domain::DomainResult;
use crate::services::rolling_history::RollingHistory;

const SIGNAL_BUFFER: usize = 256;
const COMPONENT: &str = "admission_governor";

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A task asking for an admission slot.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    /// Stable per execution; re-admission of the same id consults the
    /// retry ledger.
    pub task_id: Uuid,
    pub queue_class: QueueClass,
    /// Selects the premium long-running threshold.
    pub is_premium_user: bool,
    /// Allocation ceiling; the effective deadline is the smaller of this and
    /// the queue's task timeout.
    pub max_duration_ms: Option<u64>,
    /// Credits, recorded on the task for reporting only.
    pub estimated_cost: Option<f64>,
}

impl AdmissionRequest {
    /// A free-tier request with no allocation ceiling.
    pub fn new(task_id: Uuid, queue_class: QueueClass) -> Self {
        Self {
            task_id,
            queue_class,
            is_premium_user: false,
            max_duration_ms: None,
            estimated_cost: None,
        }
    }

    pub fn premium(mut self, is_premium_user: bool) -> Self {
        self.is_premium_user = is_premium_user;
        self
    }

    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }
}

/// Proof of admission. `cancel` fires when the governor pauses, stops,
/// times out or cancels the task.
#[derive(Debug, Clone)]
pub struct AdmissionTicket {
    pub task_id: Uuid,
    pub queue_class: QueueClass,
    pub cancel: CancellationToken,
    /// Hard ceiling; survives pause and resume unchanged.
    pub deadline: Instant,
}

/// Why [`ActiveTaskRegistry::admit`] or [`ActiveTaskRegistry::resume`]
/// refused a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionRejection {
    /// The queue already holds `max_active` running tasks.
    #[error("Queue '{queue}' at capacity ({active}/{max_active})")]
    AtCapacity {
        queue: QueueClass,
        active: usize,
        max_active: usize,
    },

    /// [`ActiveTaskRegistry::shutdown`] has started.
    #[error("Governor is shutting down")]
    ShuttingDown,

    /// The registry was built without limits for this queue class.
    #[error("Queue '{0}' is not configured")]
    UnknownQueue(QueueClass),

    /// The task id is still tracked, running or paused.
    #[error("Task {0} is already active")]
    AlreadyActive(Uuid),

    /// The task was stopped more often than `long_running_stop_retries`
    /// allows.
    #[error("Task {0} has exhausted its long-running stop retries")]
    RetryBudgetExhausted(Uuid),

    /// Resume of a task that is unknown or not paused.
    #[error("Task {0} is not paused")]
    NotPaused(Uuid),
}

/// How a task left the registry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed,
}

/// What the long-running check did to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    /// Token cancelled, slot freed, record kept for resume.
    Paused,
    /// Token cancelled and record removed; the retry state goes to the ledger.
    Stopped,
}

/// Governor transitions, broadcast to subscribers.
///
/// Each signal is also appended to the rolling history, when one is
/// attached, as the [`TierEvent`] returned by [`GovernorSignal::to_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorSignal {
    /// A monitor tick found the queue at or above its load threshold.
    HighLoad {
        queue: QueueClass,
        active: usize,
        max_active: usize,
        load: f64,
    },
    /// A slot was granted.
    Admitted {
        task_id: Uuid,
        queue: QueueClass,
    },
    /// Admission refused; `reason` is the rejection's display text.
    Rejected {
        task_id: Uuid,
        queue: QueueClass,
        reason: String,
    },
    /// The task crossed its long-running threshold.
    Escalated {
        task_id: Uuid,
        queue: QueueClass,
        action: EscalationAction,
        elapsed_ms: u64,
        retry_state: RetryState,
    },
    /// The hard deadline passed; the task was removed.
    TimedOut {
        task_id: Uuid,
        queue: QueueClass,
        elapsed_ms: u64,
    },
    /// A paused task got its slot back.
    Resumed {
        task_id: Uuid,
        queue: QueueClass,
    },
    /// The task left the registry in `state`.
    Released {
        task_id: Uuid,
        queue: QueueClass,
        state: TaskState,
    },
    ShutdownStarted,
}

impl GovernorSignal {
    /// History entry for this signal. Timeouts carry `errorType: "timeout"`
    /// so they cluster alongside step failures.
    pub fn to_event(&self) -> TierEvent {
        match self {
            Self::HighLoad {
                queue,
                active,
                max_active,
                load,
            } => TierEvent::new(
                event_types::GOVERNOR_HIGH_LOAD,
                Tier::from(*queue),
                COMPONENT,
                json!({"queue": queue, "active": active, "maxActive": max_active, "load": load}),
            ),
            Self::Admitted { task_id, queue } => TierEvent::new(
                event_types::TASK_ADMITTED,
                Tier::from(*queue),
                COMPONENT,
                json!({"taskId": task_id, "queue": queue}),
            ),
            Self::Rejected {
                task_id,
                queue,
                reason,
            } => TierEvent::new(
                event_types::TASK_REJECTED,
                Tier::from(*queue),
                COMPONENT,
                json!({"taskId": task_id, "queue": queue, "reason": reason}),
            ),
            Self::Escalated {
                task_id,
                queue,
                action,
                elapsed_ms,
                retry_state,
            } => {
                let event_type = match action {
                    EscalationAction::Paused => event_types::TASK_PAUSED,
                    EscalationAction::Stopped => event_types::TASK_STOPPED,
                };
                TierEvent::new(
                    event_type,
                    Tier::from(*queue),
                    COMPONENT,
                    json!({
                        "taskId": task_id,
                        "queue": queue,
                        "elapsedMs": elapsed_ms,
                        "retryState": retry_state.label(),
                    }),
                )
            }
            Self::TimedOut {
                task_id,
                queue,
                elapsed_ms,
            } => TierEvent::new(
                event_types::TASK_TIMEOUT,
                Tier::from(*queue),
                COMPONENT,
                json!({
                    "taskId": task_id,
                    "queue": queue,
                    "elapsedMs": elapsed_ms,
                    "errorType": "timeout",
                }),
            ),
            Self::Resumed { task_id, queue } => TierEvent::new(
                event_types::TASK_RESUMED,
                Tier::from(*queue),
                COMPONENT,
                json!({"taskId": task_id, "queue": queue}),
            ),
            Self::Released {
                task_id,
                queue,
                state,
            } => {
                let event_type = match state {
                    TaskState::Completed => event_types::TASK_COMPLETED,
                    TaskState::Failed => event_types::TASK_FAILED,
                    TaskState::Stopped => event_types::TASK_STOPPED,
                    TaskState::TimedOut => event_types::TASK_TIMEOUT,
                    _ => event_types::TASK_CANCELLED,
                };
                TierEvent::new(
                    event_type,
                    Tier::from(*queue),
                    COMPONENT,
                    json!({"taskId": task_id, "queue": queue, "state": state}),
                )
            }
            Self::ShutdownStarted => TierEvent::new(
                event_types::GOVERNOR_SHUTDOWN,
                Tier::Cross,
                COMPONENT,
                json!({}),
            ),
        }
    }
}

/// Result of [`ActiveTaskRegistry::check_long_running_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongRunningOutcome {
    NotTracked,
    /// Paused tasks are not escalated until resumed.
    NotRunning,
    WithinThreshold,
    Paused,
    Stopped,
}

/// Result of [`ActiveTaskRegistry::enforce_timeout_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    NotTracked,
    WithinDeadline,
    TimedOut,
}

/// Point-in-time load of one queue class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: QueueClass,
    /// Admitted or running; paused tasks do not hold a slot.
    pub active: usize,
    pub paused: usize,
    pub max_active: usize,
    /// `active / max_active`.
    pub load: f64,
}

/// What one monitor tick did to a queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub high_load: bool,
    pub timed_out: Vec<Uuid>,
    pub paused: Vec<Uuid>,
    pub stopped: Vec<Uuid>,
}

/// Summary of [`ActiveTaskRegistry::shutdown`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Tasks that reached a terminal state within the grace period.
    pub drained: usize,
    /// Tasks force-terminated after the grace period.
    pub forced: Vec<Uuid>,
    pub elapsed_ms: u64,
}

struct TaskEntry {
    record: ActiveTaskRecord,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<Uuid, TaskEntry>,
    /// Retry state of stopped tasks, consulted on re-admission.
    ledger: HashMap<Uuid, RetryState>,
}

impl QueueState {
    fn active(&self) -> usize {
        self.tasks
            .values()
            .filter(|e| e.record.state.holds_slot())
            .count()
    }

    fn paused(&self) -> usize {
        self.tasks
            .values()
            .filter(|e| e.record.state == TaskState::Paused)
            .count()
    }
}

struct QueueSlot {
    limits: ActiveTaskRegistryLimits,
    state: Mutex<QueueState>,
    /// Fires on every release and on resume.
    changed: Notify,
}

/// The admission governor: one capacity-limited slot table per queue class.
///
/// Shared as `Arc<ActiveTaskRegistry>` between the executor, which admits and
/// releases, and the monitor loops started by
/// [`spawn_monitor`](Self::spawn_monitor), which escalate and time out.
pub struct ActiveTaskRegistry {
    queues: HashMap<QueueClass, QueueSlot>,
    accepting: AtomicBool,
    signals: broadcast::Sender<GovernorSignal>,
    history: Option<Arc<RollingHistory>>,
    tasks_root: CancellationToken,
    monitor_cancel: CancellationToken,
}

impl ActiveTaskRegistry {
    /// Registry for all three queue classes.
    pub fn new(queues: &QueuesConfig) -> DomainResult<Self> {
        Self::with_limits(queues.iter().map(|(queue, limits)| (queue, limits.clone())))
    }

    /// Registry for an explicit set of queue classes. Every limit set is
    /// validated; the first violation aborts construction.
    pub fn with_limits(
        limits: impl IntoIterator<Item = (QueueClass, ActiveTaskRegistryLimits)>,
    ) -> DomainResult<Self> {
        let mut queues = HashMap::new();
        for (queue, limits) in limits {
            limits.validate(queue)?;
            queues.insert(
                queue,
                QueueSlot {
                    limits,
                    state: Mutex::new(QueueState::default()),
                    changed: Notify::new(),
                },
            );
        }
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Ok(Self {
            queues,
            accepting: AtomicBool::new(true),
            signals,
            history: None,
            tasks_root: CancellationToken::new(),
            monitor_cancel: CancellationToken::new(),
        })
    }

    /// Also append every transition to `history`.
    pub fn with_history(mut self, history: Arc<RollingHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Live feed of every transition from now on. Slow receivers lag rather
    /// than block the governor.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorSignal> {
        self.signals.subscribe()
    }

    /// Limits for `queue`, or `None` when it is not configured.
    pub fn limits(&self, queue: QueueClass) -> Option<&ActiveTaskRegistryLimits> {
        self.queues.get(&queue).map(|slot| &slot.limits)
    }

    /// False once shutdown has started.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn emit(&self, signal: GovernorSignal) {
        if let Some(history) = &self.history {
            history.append(signal.to_event());
        }
        // No receivers is fine.
        let _ = self.signals.send(signal);
    }

    fn locate(&self, task_id: Uuid) -> Option<(QueueClass, &QueueSlot)> {
        self.queues
            .iter()
            .find(|(_, slot)| slot.state.lock().tasks.contains_key(&task_id))
            .map(|(queue, slot)| (*queue, slot))
    }

    /// Grant a slot in the request's queue or say why not.
    ///
    /// The deadline is fixed here from the smaller of the allocation ceiling
    /// and the queue's task timeout. A task with a ledger entry is
    /// re-admitted with its earlier retry state, unless its stop retries
    /// are spent. Both outcomes are signalled.
    pub fn admit(&self, request: AdmissionRequest) -> Result<AdmissionTicket, AdmissionRejection> {
        let outcome = self.try_admit(&request);
        match &outcome {
            Ok(ticket) => {
                info!(
                    task_id = %ticket.task_id,
                    queue = %ticket.queue_class,
                    premium = request.is_premium_user,
                    "task admitted"
                );
                self.emit(GovernorSignal::Admitted {
                    task_id: ticket.task_id,
                    queue: ticket.queue_class,
                });
            }
            Err(rejection) => {
                debug!(task_id = %request.task_id, reason = %rejection, "admission rejected");
                self.emit(GovernorSignal::Rejected {
                    task_id: request.task_id,
                    queue: request.queue_class,
                    reason: rejection.to_string(),
                });
            }
        }
        outcome
    }

    fn try_admit(&self, request: &AdmissionRequest) -> Result<AdmissionTicket, AdmissionRejection> {
        if !self.is_accepting() {
            return Err(AdmissionRejection::ShuttingDown);
        }
        let slot = self
            .queues
            .get(&request.queue_class)
            .ok_or(AdmissionRejection::UnknownQueue(request.queue_class))?;

        let mut state = slot.state.lock();
        if state.tasks.contains_key(&request.task_id) {
            return Err(AdmissionRejection::AlreadyActive(request.task_id));
        }
        let retry_state = state
            .ledger
            .get(&request.task_id)
            .copied()
            .unwrap_or_default();
        if retry_state.stops_used > slot.limits.long_running_stop_retries {
            return Err(AdmissionRejection::RetryBudgetExhausted(request.task_id));
        }
        let active = state.active();
        if active >= slot.limits.max_active {
            return Err(AdmissionRejection::AtCapacity {
                queue: request.queue_class,
                active,
                max_active: slot.limits.max_active,
            });
        }

        let ceiling = request
            .max_duration_ms
            .map(Duration::from_millis)
            .map_or(slot.limits.task_timeout(), |d| d.min(slot.limits.task_timeout()));
        let now = Instant::now();
        let cancel = self.tasks_root.child_token();
        let record = ActiveTaskRecord {
            task_id: request.task_id,
            queue_class: request.queue_class,
            started_at: now,
            admitted_at: chrono::Utc::now(),
            is_premium_user: request.is_premium_user,
            retry_state,
            state: TaskState::Admitted,
            deadline: now + ceiling,
            estimated_cost: request.estimated_cost,
        };
        state.tasks.insert(
            request.task_id,
            TaskEntry {
                record,
                cancel: cancel.clone(),
            },
        );

        Ok(AdmissionTicket {
            task_id: request.task_id,
            queue_class: request.queue_class,
            cancel,
            deadline: now + ceiling,
        })
    }

    /// Admitted → Running. Returns false when the task is not admitted.
    pub fn mark_running(&self, task_id: Uuid) -> bool {
        let Some((_, slot)) = self.locate(task_id) else {
            return false;
        };
        let mut state = slot.state.lock();
        match state.tasks.get_mut(&task_id) {
            Some(entry) if entry.record.state == TaskState::Admitted => {
                entry.record.state = TaskState::Running;
                true
            }
            _ => false,
        }
    }

    /// Remove a task, signal its token and wake shutdown waiters.
    fn release(&self, task_id: Uuid, final_state: TaskState) -> Option<ActiveTaskRecord> {
        let (queue, slot) = self.locate(task_id)?;
        let record = {
            let mut state = slot.state.lock();
            let mut entry = state.tasks.remove(&task_id)?;
            entry.record.state = final_state;
            entry.cancel.cancel();
            if final_state == TaskState::Stopped {
                state.ledger.insert(task_id, entry.record.retry_state);
            } else {
                state.ledger.remove(&task_id);
            }
            entry.record
        };
        slot.changed.notify_waiters();
        self.emit(GovernorSignal::Released {
            task_id,
            queue,
            state: final_state,
        });
        Some(record)
    }

    /// Record a task's own terminal outcome and free its slot.
    pub fn complete(&self, task_id: Uuid, outcome: TerminalOutcome) -> bool {
        let final_state = match outcome {
            TerminalOutcome::Completed => TaskState::Completed,
            TerminalOutcome::Failed => TaskState::Failed,
        };
        let released = self.release(task_id, final_state).is_some();
        if released {
            debug!(task_id = %task_id, state = %final_state, "task released");
        }
        released
    }

    /// External cancellation. The slot is free when this returns, even if the
    /// task's own execution is still unwinding.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let cancelled = self.release(task_id, TaskState::Cancelled).is_some();
        if cancelled {
            info!(task_id = %task_id, "task cancelled");
        }
        cancelled
    }

    /// Paused → Running if the queue has room. The deadline is unchanged.
    pub fn resume(&self, task_id: Uuid) -> Result<AdmissionTicket, AdmissionRejection> {
        if !self.is_accepting() {
            return Err(AdmissionRejection::ShuttingDown);
        }
        let (queue, slot) = self
            .locate(task_id)
            .ok_or(AdmissionRejection::NotPaused(task_id))?;

        let ticket = {
            let mut state = slot.state.lock();
            let active = state.active();
            let entry = state
                .tasks
                .get_mut(&task_id)
                .filter(|e| e.record.state == TaskState::Paused)
                .ok_or(AdmissionRejection::NotPaused(task_id))?;
            if active >= slot.limits.max_active {
                return Err(AdmissionRejection::AtCapacity {
                    queue,
                    active,
                    max_active: slot.limits.max_active,
                });
            }
            entry.record.state = TaskState::Running;
            entry.cancel = self.tasks_root.child_token();
            AdmissionTicket {
                task_id,
                queue_class: queue,
                cancel: entry.cancel.clone(),
                deadline: entry.record.deadline,
            }
        };
        slot.changed.notify_waiters();
        info!(task_id = %task_id, queue = %queue, "task resumed");
        self.emit(GovernorSignal::Resumed { task_id, queue });
        Ok(ticket)
    }

    /// Wait for a paused task to get its slot back.
    ///
    /// Returns the task's current ticket as soon as it holds a slot with a
    /// live token, and `None` once the task has left the registry (stopped,
    /// timed out, cancelled or force-terminated).
    pub async fn resumed(&self, task_id: Uuid) -> Option<AdmissionTicket> {
        let (queue, slot) = self.locate(task_id)?;
        loop {
            let notified = slot.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let ticket = {
                let state = slot.state.lock();
                let entry = state.tasks.get(&task_id)?;
                (entry.record.state.holds_slot() && !entry.cancel.is_cancelled()).then(|| {
                    AdmissionTicket {
                        task_id,
                        queue_class: queue,
                        cancel: entry.cancel.clone(),
                        deadline: entry.record.deadline,
                    }
                })
            };
            if ticket.is_some() {
                return ticket;
            }
            notified.await;
        }
    }

    /// Retry state kept for a stopped task, if any. Once a task has left the
    /// registry, present exactly when its exit was a stop or a forced
    /// shutdown; completion, cancellation and timeout clear it.
    pub fn retry_ledger(&self, task_id: Uuid) -> Option<RetryState> {
        self.queues
            .values()
            .find_map(|slot| slot.state.lock().ledger.get(&task_id).copied())
    }

    /// [`check_long_running_at`](Self::check_long_running_at) against the
    /// current instant.
    pub fn check_long_running(&self, task_id: Uuid) -> LongRunningOutcome {
        self.check_long_running_at(task_id, Instant::now())
    }

    /// Compare elapsed runtime since the original start against the user's
    /// threshold and escalate per policy and remaining retry budget.
    pub fn check_long_running_at(&self, task_id: Uuid, now: Instant) -> LongRunningOutcome {
        let Some((queue, slot)) = self.locate(task_id) else {
            return LongRunningOutcome::NotTracked;
        };
        let limits = &slot.limits;

        let (outcome, elapsed, retry_state) = {
            let mut state = slot.state.lock();
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                return LongRunningOutcome::NotTracked;
            };
            if !entry.record.state.holds_slot() {
                return LongRunningOutcome::NotRunning;
            }
            let elapsed = entry.record.elapsed_at(now);
            if elapsed <= limits.long_running_threshold(entry.record.is_premium_user) {
                return LongRunningOutcome::WithinThreshold;
            }

            let can_pause = limits.on_long_running_first_threshold == LongRunningPolicy::Pause
                && entry.record.retry_state.pauses_used < limits.long_running_pause_retries;
            if can_pause {
                entry.record.retry_state.pauses_used += 1;
                entry.record.state = TaskState::Paused;
                entry.cancel.cancel();
                (LongRunningOutcome::Paused, elapsed, entry.record.retry_state)
            } else {
                let Some(mut entry) = state.tasks.remove(&task_id) else {
                    return LongRunningOutcome::NotTracked;
                };
                entry.record.retry_state.stops_used += 1;
                entry.record.state = TaskState::Stopped;
                entry.cancel.cancel();
                state.ledger.insert(task_id, entry.record.retry_state);
                (LongRunningOutcome::Stopped, elapsed, entry.record.retry_state)
            }
        };
        slot.changed.notify_waiters();

        let action = if outcome == LongRunningOutcome::Paused {
            EscalationAction::Paused
        } else {
            EscalationAction::Stopped
        };
        warn!(
            task_id = %task_id,
            queue = %queue,
            elapsed_ms = millis(elapsed),
            action = ?action,
            retry_state = %retry_state.label(),
            "long-running task escalated"
        );
        self.emit(GovernorSignal::Escalated {
            task_id,
            queue,
            action,
            elapsed_ms: millis(elapsed),
            retry_state,
        });
        outcome
    }

    /// [`enforce_timeout_at`](Self::enforce_timeout_at) against the current
    /// instant.
    pub fn enforce_timeout(&self, task_id: Uuid) -> TimeoutOutcome {
        self.enforce_timeout_at(task_id, Instant::now())
    }

    /// Hard ceiling: terminates at the deadline whatever the retry budget,
    /// paused tasks included.
    pub fn enforce_timeout_at(&self, task_id: Uuid, now: Instant) -> TimeoutOutcome {
        let Some((queue, slot)) = self.locate(task_id) else {
            return TimeoutOutcome::NotTracked;
        };
        let elapsed = {
            let mut state = slot.state.lock();
            let Some(entry) = state.tasks.get(&task_id) else {
                return TimeoutOutcome::NotTracked;
            };
            if now < entry.record.deadline {
                return TimeoutOutcome::WithinDeadline;
            }
            let elapsed = entry.record.elapsed_at(now);
            if let Some(entry) = state.tasks.remove(&task_id) {
                entry.cancel.cancel();
            }
            state.ledger.remove(&task_id);
            elapsed
        };
        slot.changed.notify_waiters();

        warn!(task_id = %task_id, queue = %queue, elapsed_ms = millis(elapsed), "task timed out");
        self.emit(GovernorSignal::TimedOut {
            task_id,
            queue,
            elapsed_ms: millis(elapsed),
        });
        TimeoutOutcome::TimedOut
    }

    /// Tasks holding a slot in `queue`.
    pub fn active_count(&self, queue: QueueClass) -> usize {
        self.queues
            .get(&queue)
            .map_or(0, |slot| slot.state.lock().active())
    }

    /// Copy of a tracked task's record, paused tasks included.
    pub fn record(&self, task_id: Uuid) -> Option<ActiveTaskRecord> {
        let (_, slot) = self.locate(task_id)?;
        let state = slot.state.lock();
        state.tasks.get(&task_id).map(|e| e.record.clone())
    }

    /// Current load of `queue`, or `None` when it is not configured.
    pub fn snapshot(&self, queue: QueueClass) -> Option<QueueSnapshot> {
        let slot = self.queues.get(&queue)?;
        let (active, paused) = {
            let state = slot.state.lock();
            (state.active(), state.paused())
        };
        Some(QueueSnapshot {
            queue,
            active,
            paused,
            max_active: slot.limits.max_active,
            load: active as f64 / slot.limits.max_active as f64,
        })
    }

    /// One monitor tick for `queue`: load signal, then timeouts, then
    /// long-running escalation.
    pub fn sweep_at(&self, queue: QueueClass, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(slot) = self.queues.get(&queue) else {
            return report;
        };
        let Some(snapshot) = self.snapshot(queue) else {
            return report;
        };

        if snapshot.load >= slot.limits.high_load_threshold_percentage {
            report.high_load = true;
            info!(queue = %queue, active = snapshot.active, load = snapshot.load, "queue under high load");
            self.emit(GovernorSignal::HighLoad {
                queue,
                active: snapshot.active,
                max_active: snapshot.max_active,
                load: snapshot.load,
            });
        }

        let task_ids: Vec<Uuid> = slot.state.lock().tasks.keys().copied().collect();
        for task_id in task_ids {
            if self.enforce_timeout_at(task_id, now) == TimeoutOutcome::TimedOut {
                report.timed_out.push(task_id);
                continue;
            }
            match self.check_long_running_at(task_id, now) {
                LongRunningOutcome::Paused => report.paused.push(task_id),
                LongRunningOutcome::Stopped => report.stopped.push(task_id),
                _ => {}
            }
        }
        report
    }

    /// Start one periodic, cancellable monitor loop per queue class.
    pub fn spawn_monitor(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.queues
            .iter()
            .map(|(queue, slot)| {
                let governor = Arc::clone(self);
                let queue = *queue;
                let period = slot.limits.check_interval();
                let stop = self.monitor_cancel.child_token();

                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    debug!(queue = %queue, interval_ms = millis(period), "governor monitor started");

                    loop {
                        tokio::select! {
                            () = stop.cancelled() => break,
                            _ = ticker.tick() => {
                                governor.sweep_at(queue, Instant::now());
                            }
                        }
                    }
                    debug!(queue = %queue, "governor monitor stopped");
                })
            })
            .collect()
    }

    /// End every loop started by [`spawn_monitor`](Self::spawn_monitor).
    pub fn stop_monitor(&self) {
        self.monitor_cancel.cancel();
    }

    async fn drain(slot: &QueueSlot) {
        let deadline = Instant::now() + slot.limits.shutdown_grace_period();
        let wait = async {
            loop {
                let notified = slot.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let idle = slot.state.lock().active() == 0;
                if idle {
                    break;
                }
                notified.await;
            }
        };
        // Elapsed grace period is handled by the caller.
        let _ = tokio::time::timeout_at(deadline, wait).await;
    }

    /// Stop admitting, give in-flight tasks each queue's grace period and
    /// force-terminate whatever is left.
    pub async fn shutdown(&self) -> ShutdownReport {
        let started = Instant::now();
        self.accepting.store(false, Ordering::Release);
        info!("admission governor shutting down");
        self.emit(GovernorSignal::ShutdownStarted);

        let tracked: usize = self
            .queues
            .values()
            .map(|slot| slot.state.lock().tasks.len())
            .sum();

        futures::future::join_all(self.queues.values().map(Self::drain)).await;

        let mut forced = Vec::new();
        for (queue, slot) in &self.queues {
            let remaining: Vec<TaskEntry> = {
                let mut state = slot.state.lock();
                let remaining: Vec<TaskEntry> = state.tasks.drain().map(|(_, entry)| entry).collect();
                for entry in &remaining {
                    state.ledger.insert(entry.record.task_id, entry.record.retry_state);
                }
                remaining
            };
            for entry in remaining {
                entry.cancel.cancel();
                let task_id = entry.record.task_id;
                warn!(task_id = %task_id, queue = %queue, state = %entry.record.state, "force-terminating task");
                forced.push(task_id);
                self.emit(GovernorSignal::Released {
                    task_id,
                    queue: *queue,
                    state: TaskState::Stopped,
                });
            }
            slot.changed.notify_waiters();
        }
        self.monitor_cancel.cancel();

        let report = ShutdownReport {
            drained: tracked.saturating_sub(forced.len()),
            forced,
            elapsed_ms: millis(started.elapsed()),
        };
        info!(
            drained = report.drained,
            forced = report.forced.len(),
            "admission governor stopped"
        );
        report
    }
}
