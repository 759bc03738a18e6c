use serde::{Deserialize, Serialize};

use super::limits::ActiveTaskRegistryLimits;
use super::strategy::{ExecutionKind, StrategyType};
use super::task::QueueClass;
use super::tier_input::TierKind;

/// Main configuration structure for swarmgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Admission limits per queue class
    #[serde(default)]
    pub queues: QueuesConfig,

    /// Rolling history configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Emergent pattern thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Tier discrimination and strategy dispatch rules
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Limits for each queue class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueuesConfig {
    #[serde(default = "ActiveTaskRegistryLimits::swarm_defaults")]
    pub swarm: ActiveTaskRegistryLimits,

    #[serde(default)]
    pub routine: ActiveTaskRegistryLimits,

    #[serde(default = "ActiveTaskRegistryLimits::step_defaults")]
    pub step: ActiveTaskRegistryLimits,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            swarm: ActiveTaskRegistryLimits::swarm_defaults(),
            routine: ActiveTaskRegistryLimits::default(),
            step: ActiveTaskRegistryLimits::step_defaults(),
        }
    }
}

impl QueuesConfig {
    pub fn get(&self, queue: QueueClass) -> &ActiveTaskRegistryLimits {
        match queue {
            QueueClass::Swarm => &self.swarm,
            QueueClass::Routine => &self.routine,
            QueueClass::Step => &self.step,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueueClass, &ActiveTaskRegistryLimits)> {
        QueueClass::ALL.into_iter().map(move |q| (q, self.get(q)))
    }
}

/// Rolling history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryConfig {
    /// Maximum events retained before the oldest is evicted
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Buffer of the live event broadcast channel
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,
}

const fn default_history_capacity() -> usize {
    10_000
}

const fn default_broadcast_buffer() -> usize {
    256
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            broadcast_buffer: default_broadcast_buffer(),
        }
    }
}

/// Thresholds used by the emergent monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Interval of periodic analysis
    #[serde(default = "default_analysis_interval_ms")]
    pub analysis_interval_ms: u64,

    /// Components whose p95 step duration exceeds this are bottlenecks
    #[serde(default = "default_bottleneck_threshold_ms")]
    pub bottleneck_p95_threshold_ms: f64,

    /// Temporal window for error clustering
    #[serde(default = "default_error_cluster_window_ms")]
    pub error_cluster_window_ms: i64,

    /// Smallest error cluster worth reporting
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// An allocation this many times the average is a spike
    #[serde(default = "default_credit_spike_factor")]
    pub credit_spike_factor: f64,

    /// Approval fraction for a swarm cycle to count as consensus
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
}

const fn default_analysis_interval_ms() -> u64 {
    60_000
}

const fn default_bottleneck_threshold_ms() -> f64 {
    30_000.0
}

const fn default_error_cluster_window_ms() -> i64 {
    300_000
}

const fn default_min_cluster_size() -> usize {
    3
}

const fn default_credit_spike_factor() -> f64 {
    3.0
}

const fn default_consensus_threshold() -> f64 {
    0.7
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analysis_interval_ms: default_analysis_interval_ms(),
            bottleneck_p95_threshold_ms: default_bottleneck_threshold_ms(),
            error_cluster_window_ms: default_error_cluster_window_ms(),
            min_cluster_size: default_min_cluster_size(),
            credit_spike_factor: default_credit_spike_factor(),
            consensus_threshold: default_consensus_threshold(),
        }
    }
}

/// Keywords that make a strategy claim a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub strategy: StrategyType,
    pub keywords: Vec<String>,
}

/// Keywords that classify deterministic work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindRule {
    pub kind: ExecutionKind,
    pub keywords: Vec<String>,
}

/// Tier discrimination and strategy dispatch rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Order in which payload shapes are tried when discriminating
    #[serde(default = "default_tier_order")]
    pub tier_order: Vec<TierKind>,

    #[serde(default = "default_strategy_rules")]
    pub strategy_rules: Vec<KeywordRule>,

    /// Checked in order; the first match wins
    #[serde(default = "default_kind_rules")]
    pub kind_rules: Vec<KindRule>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tier_order: default_tier_order(),
            strategy_rules: default_strategy_rules(),
            kind_rules: default_kind_rules(),
        }
    }
}

pub fn default_tier_order() -> Vec<TierKind> {
    vec![TierKind::Swarm, TierKind::Routine, TierKind::Step]
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| (*w).to_string()).collect()
}

pub fn default_strategy_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule {
            strategy: StrategyType::Deterministic,
            keywords: words(&[
                "transform", "map", "convert", "format", "parse", "filter", "api", "http",
                "fetch", "webhook", "script", "code", "calculate", "validate",
            ]),
        },
        KeywordRule {
            strategy: StrategyType::Routing,
            keywords: words(&["route", "branch", "switch", "dispatch", "classify"]),
        },
        KeywordRule {
            strategy: StrategyType::Conversational,
            keywords: words(&["chat", "conversation", "respond", "reply", "message", "ask"]),
        },
        KeywordRule {
            strategy: StrategyType::Reasoning,
            keywords: words(&[
                "analyze", "reason", "plan", "decide", "evaluate", "summarize", "research",
            ]),
        },
    ]
}

pub fn default_kind_rules() -> Vec<KindRule> {
    vec![
        KindRule {
            kind: ExecutionKind::ApiIntegration,
            keywords: words(&["api", "http", "fetch", "webhook", "request", "endpoint"]),
        },
        KindRule {
            kind: ExecutionKind::CodeExecution,
            keywords: words(&["code", "script", "exec", "sandbox", "compute", "calculate"]),
        },
        KindRule {
            kind: ExecutionKind::DataTransform,
            keywords: words(&["transform", "convert", "format", "parse", "filter", "normalize"]),
        },
    ]
}
