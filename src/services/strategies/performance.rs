//! Per-strategy rolling performance counters.

use parking_lot::Mutex;

use crate::domain::models::{ExecutionResult, PerformanceMetrics};

const SUCCESS_WEIGHT: f64 = 0.6;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const SPEED_WEIGHT: f64 = 0.1;

/// Owned aggregate of one strategy's counters.
///
/// Every update goes through the single `record` path under one lock, so
/// parallel executions of the same strategy never lose an increment.
#[derive(Debug)]
pub struct PerformanceTracker {
    metrics: Mutex<PerformanceMetrics>,
    /// Execution time at which the speed component of the score reaches zero.
    target_execution_ms: f64,
}

impl PerformanceTracker {
    pub fn new(target_execution_ms: f64) -> Self {
        Self {
            metrics: Mutex::new(PerformanceMetrics::default()),
            target_execution_ms: target_execution_ms.max(1.0),
        }
    }

    pub fn record(&self, result: &ExecutionResult, elapsed_ms: u64, cost: f64) {
        let mut m = self.metrics.lock();
        m.total_executions += 1;
        if result.success {
            m.success_count += 1;
        } else {
            m.failure_count += 1;
        }

        let n = m.total_executions as f64;
        m.average_execution_time = (m.average_execution_time * (n - 1.0) + elapsed_ms as f64) / n;
        m.average_resource_usage = (m.average_resource_usage * (n - 1.0) + cost) / n;
        m.average_confidence =
            (m.average_confidence * (n - 1.0) + result.metadata.confidence.clamp(0.0, 1.0)) / n;

        let speed = 1.0 - (m.average_execution_time / self.target_execution_ms).min(1.0);
        m.evolution_score = SUCCESS_WEIGHT * m.success_rate()
            + CONFIDENCE_WEIGHT * m.average_confidence
            + SPEED_WEIGHT * speed;
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        *self.metrics.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StrategyType;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_running_averages() {
        let tracker = PerformanceTracker::new(1_000.0);
        let ok = ExecutionResult::success(StrategyType::Deterministic, json!({}), 1.0);
        let failed = ExecutionResult::failure(StrategyType::Deterministic, "boom");

        tracker.record(&ok, 100, 0.5);
        tracker.record(&failed, 300, 1.5);

        let m = tracker.snapshot();
        assert_eq!(m.total_executions, 2);
        assert_eq!(m.success_count, 1);
        assert_eq!(m.failure_count, 1);
        assert!((m.average_execution_time - 200.0).abs() < 1e-9);
        assert!((m.average_resource_usage - 1.0).abs() < 1e-9);
        assert!((m.average_confidence - 0.5).abs() < 1e-9);
        // 0.6 * 0.5 + 0.3 * 0.5 + 0.1 * 0.8
        assert!((m.evolution_score - 0.53).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let tracker = Arc::new(PerformanceTracker::new(1_000.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let ok = ExecutionResult::success(StrategyType::Routing, json!({}), 0.9);
                    for _ in 0..250 {
                        t.record(&ok, 1, 0.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.snapshot().total_executions, 2_000);
    }
}
