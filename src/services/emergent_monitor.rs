//! Pattern analyses over rolling-history snapshots.
//!
//! Every analysis is a pure function of an event slice and the
//! [`MonitorConfig`] thresholds; none of them touch the history itself.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::models::{event_types, MonitorConfig, Tier, TierEvent};
use crate::services::rolling_history::{matches_type, RollingHistory};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub component: String,
    pub avg_duration: f64,
    pub p95_duration: f64,
    pub frequency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSpike {
    pub component: String,
    pub credits: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAnomalies {
    pub has_anomalies: bool,
    pub avg_credits_per_step: f64,
    pub credit_spikes: Vec<CreditSpike>,
    pub resource_exhaustion: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyEffectiveness {
    pub strategy: String,
    pub success_rate: f64,
    pub avg_duration: f64,
    pub usage: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCluster {
    pub error_type: String,
    pub count: usize,
    pub time_window: TimeWindow,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmBehavior {
    pub active_swarms: usize,
    pub avg_decisions_per_cycle: f64,
    /// Fraction of decision cycles that reached consensus.
    pub consensus_rate: f64,
    /// Adaptations per decision cycle.
    pub adaptation_frequency: f64,
}

/// Derived, ephemeral summary of one history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternReport {
    pub generated_at: DateTime<Utc>,
    pub events_analyzed: usize,
    pub bottlenecks: Vec<Bottleneck>,
    pub resource_anomalies: ResourceAnomalies,
    pub strategy_effectiveness: Vec<StrategyEffectiveness>,
    pub error_clusters: Vec<ErrorCluster>,
    pub swarm_behavior: SwarmBehavior,
    pub recommendations: Vec<String>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank 95th percentile of an ascending slice.
fn p95(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (0.95 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct EmergentMonitor {
    config: MonitorConfig,
    reports: broadcast::Sender<PatternReport>,
}

impl EmergentMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (reports, _) = broadcast::channel(16);
        Self { config, reports }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Per-component step durations whose p95 exceeds the threshold,
    /// slowest first.
    pub fn detect_bottlenecks(&self, events: &[TierEvent]) -> Vec<Bottleneck> {
        let mut durations: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for event in events
            .iter()
            .filter(|e| e.event_type == event_types::STEP_COMPLETED)
        {
            if let Some(ms) = event.data_f64("durationMs") {
                durations.entry(event.component.as_str()).or_default().push(ms);
            }
        }

        let mut bottlenecks: Vec<Bottleneck> = durations
            .into_iter()
            .filter_map(|(component, mut values)| {
                values.sort_by(f64::total_cmp);
                let p95_duration = p95(&values);
                (p95_duration > self.config.bottleneck_p95_threshold_ms).then(|| Bottleneck {
                    component: component.to_string(),
                    avg_duration: mean(&values),
                    p95_duration,
                    frequency: values.len(),
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| b.p95_duration.total_cmp(&a.p95_duration));
        bottlenecks
    }

    pub fn detect_resource_anomalies(&self, events: &[TierEvent]) -> ResourceAnomalies {
        let allocations: Vec<(&TierEvent, f64)> = events
            .iter()
            .filter(|e| e.event_type == event_types::RESOURCE_ALLOCATED)
            .filter_map(|e| e.data_f64("credits").map(|credits| (e, credits)))
            .collect();
        let resource_exhaustion = events
            .iter()
            .filter(|e| e.event_type == event_types::RESOURCE_EXHAUSTED)
            .count();

        let credits: Vec<f64> = allocations.iter().map(|(_, c)| *c).collect();
        let avg_credits_per_step = mean(&credits);
        let spike_floor = avg_credits_per_step * self.config.credit_spike_factor;
        let credit_spikes: Vec<CreditSpike> = allocations
            .iter()
            .filter(|(_, c)| avg_credits_per_step > 0.0 && *c > spike_floor)
            .map(|(event, c)| CreditSpike {
                component: event.component.clone(),
                credits: *c,
                timestamp: event.timestamp,
            })
            .collect();

        ResourceAnomalies {
            has_anomalies: !credit_spikes.is_empty() || resource_exhaustion > 0,
            avg_credits_per_step,
            credit_spikes,
            resource_exhaustion,
        }
    }

    /// Join each `strategy_selected` with the next `*.completed` event
    /// naming the same strategy. Each completion is consumed once.
    pub fn analyze_strategy_effectiveness(&self, events: &[TierEvent]) -> Vec<StrategyEffectiveness> {
        #[derive(Default)]
        struct Tally {
            usage: usize,
            pending: usize,
            outcomes: Vec<(bool, Option<f64>)>,
        }

        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
        for event in events {
            let Some(strategy) = event.data_str("strategy") else {
                continue;
            };
            if event.event_type == event_types::STRATEGY_SELECTED {
                let tally = tallies.entry(strategy.to_string()).or_default();
                tally.usage += 1;
                tally.pending += 1;
            } else if matches_type(&event.event_type, "*.completed") {
                if let Some(tally) = tallies.get_mut(strategy).filter(|t| t.pending > 0) {
                    tally.pending -= 1;
                    tally
                        .outcomes
                        .push((event.data_bool("success").unwrap_or(true), event.data_f64("durationMs")));
                }
            }
        }

        tallies
            .into_iter()
            .map(|(strategy, tally)| {
                let successes = tally.outcomes.iter().filter(|(ok, _)| *ok).count();
                let durations: Vec<f64> = tally.outcomes.iter().filter_map(|(_, d)| *d).collect();
                StrategyEffectiveness {
                    strategy,
                    success_rate: if tally.outcomes.is_empty() {
                        0.0
                    } else {
                        successes as f64 / tally.outcomes.len() as f64
                    },
                    avg_duration: mean(&durations),
                    usage: tally.usage,
                }
            })
            .collect()
    }

    /// Single-pass temporal clustering of error events per error type.
    ///
    /// A cluster opens at its first event and takes every later event within
    /// the window of that first event; the next event outside the window
    /// opens a new cluster.
    pub fn cluster_errors(&self, events: &[TierEvent]) -> Vec<ErrorCluster> {
        let window = ChronoDuration::milliseconds(self.config.error_cluster_window_ms);
        let mut groups: BTreeMap<String, Vec<&TierEvent>> = BTreeMap::new();
        for event in events {
            if let Some(error_type) = event.error_type() {
                groups.entry(error_type.to_string()).or_default().push(event);
            }
        }

        let mut clusters = Vec::new();
        for (error_type, mut group) in groups {
            group.sort_by_key(|e| e.timestamp);
            let mut current: Vec<&TierEvent> = Vec::new();
            for event in group {
                let outside = current
                    .first()
                    .is_some_and(|start| event.timestamp - start.timestamp > window);
                if outside {
                    self.close_cluster(&error_type, &current, &mut clusters);
                    current.clear();
                }
                current.push(event);
            }
            self.close_cluster(&error_type, &current, &mut clusters);
        }
        clusters
    }

    fn close_cluster(&self, error_type: &str, members: &[&TierEvent], out: &mut Vec<ErrorCluster>) {
        if members.len() < self.config.min_cluster_size.max(1) {
            return;
        }
        let (Some(first), Some(last)) = (members.first(), members.last()) else {
            return;
        };
        let mut seen = HashSet::new();
        let components = members
            .iter()
            .filter(|e| seen.insert(e.component.as_str()))
            .map(|e| e.component.clone())
            .collect();
        out.push(ErrorCluster {
            error_type: error_type.to_string(),
            count: members.len(),
            time_window: TimeWindow {
                start: first.timestamp,
                end: last.timestamp,
            },
            components,
        });
    }

    pub fn analyze_swarm_behavior(&self, events: &[TierEvent]) -> SwarmBehavior {
        let tier1: Vec<&TierEvent> = events
            .iter()
            .filter(|e| e.tier == Tier::Coordination)
            .collect();

        let active_swarms = tier1
            .iter()
            .filter_map(|e| e.data.get("swarmId").and_then(value_key))
            .collect::<HashSet<_>>()
            .len();

        // cycle -> (decisions, approvals)
        let mut cycles: HashMap<String, (usize, usize)> = HashMap::new();
        let mut adaptations = 0usize;
        for event in &tier1 {
            if event.event_type == event_types::SWARM_DECISION {
                let cycle = event
                    .data
                    .get("cycleId")
                    .and_then(value_key)
                    .unwrap_or_else(|| "default".to_string());
                let entry = cycles.entry(cycle).or_default();
                entry.0 += 1;
                if event.data_bool("approved").unwrap_or(false) {
                    entry.1 += 1;
                }
            } else if event.event_type == event_types::SWARM_ADAPTED {
                adaptations += 1;
            }
        }

        if cycles.is_empty() {
            return SwarmBehavior {
                active_swarms,
                ..SwarmBehavior::default()
            };
        }
        let cycle_count = cycles.len() as f64;
        let decisions: usize = cycles.values().map(|(d, _)| d).sum();
        let consensus = cycles
            .values()
            .filter(|(d, a)| *a as f64 / *d as f64 >= self.config.consensus_threshold)
            .count();

        SwarmBehavior {
            active_swarms,
            avg_decisions_per_cycle: decisions as f64 / cycle_count,
            consensus_rate: consensus as f64 / cycle_count,
            adaptation_frequency: adaptations as f64 / cycle_count,
        }
    }

    pub fn analyze(&self, events: &[TierEvent]) -> PatternReport {
        let bottlenecks = self.detect_bottlenecks(events);
        let resource_anomalies = self.detect_resource_anomalies(events);
        let strategy_effectiveness = self.analyze_strategy_effectiveness(events);
        let error_clusters = self.cluster_errors(events);
        let swarm_behavior = self.analyze_swarm_behavior(events);

        let mut recommendations = Vec::new();
        for b in &bottlenecks {
            recommendations.push(format!(
                "Component '{}' has p95 step duration {:.0}ms over {} runs; consider a cheaper strategy or splitting the step",
                b.component, b.p95_duration, b.frequency
            ));
        }
        if !resource_anomalies.credit_spikes.is_empty() {
            recommendations.push(format!(
                "{} credit spike(s) above {:.1}x the average allocation of {:.4}; review allocation limits",
                resource_anomalies.credit_spikes.len(),
                self.config.credit_spike_factor,
                resource_anomalies.avg_credits_per_step
            ));
        }
        if resource_anomalies.resource_exhaustion > 0 {
            recommendations.push(format!(
                "Resource quota exhausted {} time(s); raise quotas or lower concurrency",
                resource_anomalies.resource_exhaustion
            ));
        }
        for s in strategy_effectiveness
            .iter()
            .filter(|s| s.usage >= 5 && s.success_rate < 0.5)
        {
            recommendations.push(format!(
                "Strategy '{}' succeeds in only {:.0}% of {} uses; revisit its dispatch rules",
                s.strategy,
                s.success_rate * 100.0,
                s.usage
            ));
        }
        for c in &error_clusters {
            recommendations.push(format!(
                "{} '{}' errors clustered across {}; investigate a shared cause",
                c.count,
                c.error_type,
                c.components.join(", ")
            ));
        }
        if swarm_behavior.avg_decisions_per_cycle > 0.0
            && swarm_behavior.consensus_rate < self.config.consensus_threshold
        {
            recommendations.push(format!(
                "Swarm consensus reached in only {:.0}% of decision cycles",
                swarm_behavior.consensus_rate * 100.0
            ));
        }

        PatternReport {
            generated_at: Utc::now(),
            events_analyzed: events.len(),
            bottlenecks,
            resource_anomalies,
            strategy_effectiveness,
            error_clusters,
            swarm_behavior,
            recommendations,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatternReport> {
        self.reports.subscribe()
    }

    /// Publish a report for `history` every `analysis_interval_ms` until
    /// `cancel` fires.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        history: Arc<RollingHistory>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = Duration::from_millis(self.config.analysis_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = monitor.config.analysis_interval_ms, "emergent monitor started");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = monitor.analyze(&history.snapshot());
                        debug!(
                            events = report.events_analyzed,
                            recommendations = report.recommendations.len(),
                            "pattern report generated"
                        );
                        let _ = monitor.reports.send(report);
                    }
                }
            }
            info!("emergent monitor stopped");
        })
    }
}
