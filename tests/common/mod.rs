//! Common test utilities for integration tests
//!
//! Shared request builders, fixtures and governor setups used across
//! multiple integration test files.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use swarmgate::domain::models::{
    event_types, ActiveTaskRegistryLimits, LongRunningPolicy, QueueClass, Tier, TierEvent,
};
use swarmgate::services::{ActiveTaskRegistry, RollingHistory};

/// Setup test logging
///
/// Initializes a tracing subscriber that writes through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A structurally valid execution context
pub fn context(execution_id: &str, user_id: &str) -> Value {
    json!({
        "executionId": execution_id,
        "swarmId": "swarm-1",
        "userId": user_id,
        "correlationId": format!("corr-{execution_id}"),
        "timestamp": "2026-03-01T12:00:00Z"
    })
}

pub fn allocation(max_credits: &str, max_duration_ms: u64) -> Value {
    json!({"maxCredits": max_credits, "maxDurationMs": max_duration_ms, "maxMemoryMB": 512})
}

pub fn request(execution_id: &str, input: Value) -> Value {
    json!({
        "context": context(execution_id, "user-1"),
        "input": input,
        "allocation": allocation("25", 120_000),
    })
}

/// Direct-mapping step that copies `name` to `fullName`
pub fn mapping_step(step_id: &str) -> Value {
    json!({
        "stepId": step_id,
        "stepType": "map customer fields",
        "strategy": "deterministic",
        "parameters": {
            "name": "Grace Hopper",
            "config": {"kind": "direct-mapping", "mapping": {"fullName": "name"}}
        }
    })
}

/// The routine defaults with a ten-slot queue, free threshold 300 s and
/// premium threshold 900 s
pub fn routine_limits() -> ActiveTaskRegistryLimits {
    ActiveTaskRegistryLimits {
        max_active: 10,
        on_long_running_first_threshold: LongRunningPolicy::Pause,
        long_running_pause_retries: 1,
        long_running_stop_retries: 0,
        ..ActiveTaskRegistryLimits::default()
    }
}

pub fn routine_governor() -> ActiveTaskRegistry {
    ActiveTaskRegistry::with_limits([(QueueClass::Routine, routine_limits())])
        .expect("routine limits are valid")
}

pub fn governor_with_history(history: &Arc<RollingHistory>) -> ActiveTaskRegistry {
    routine_governor().with_history(Arc::clone(history))
}

/// A `step.failed` event with the given error type at `at`
pub fn failure_at(error_type: &str, component: &str, at: DateTime<Utc>) -> TierEvent {
    TierEvent::new(
        event_types::STEP_FAILED,
        Tier::Execution,
        component,
        json!({"errorType": error_type}),
    )
    .at(at)
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}
