//! `swarmgate limits`: effective admission limits per queue class.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{ActiveTaskRegistryLimits, Config, QueueClass};
use crate::services::ActiveTaskRegistry;

#[derive(Args, Debug)]
pub struct LimitsArgs {
    /// Only show one queue class (swarm, routine, step)
    #[arg(short, long)]
    pub queue: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueLimits {
    pub queue: QueueClass,
    #[serde(flatten)]
    pub limits: ActiveTaskRegistryLimits,
}

#[derive(Debug, Serialize)]
pub struct LimitsOutput {
    pub queues: Vec<QueueLimits>,
}

fn seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

impl CommandOutput for LimitsOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&[
            "queue", "max", "high load", "check", "free", "premium", "timeout", "grace", "policy",
            "pauses", "stops",
        ]);
        for entry in &self.queues {
            let l = &entry.limits;
            table.add_row(vec![
                entry.queue.to_string(),
                l.max_active.to_string(),
                format!("{:.0}%", l.high_load_threshold_percentage * 100.0),
                seconds(l.high_load_check_interval_ms),
                seconds(l.long_running_threshold_free_ms),
                seconds(l.long_running_threshold_premium_ms),
                seconds(l.task_timeout_ms),
                seconds(l.shutdown_grace_period_ms),
                format!("{:?}", l.on_long_running_first_threshold).to_lowercase(),
                l.long_running_pause_retries.to_string(),
                l.long_running_stop_retries.to_string(),
            ]);
        }
        format!("{}\n{table}", crate::cli::output::heading("Admission limits"))
    }
}

/// Limits as the governor would load them; invalid limits are an error.
pub fn effective_limits(config: &Config, queue: Option<&str>) -> Result<LimitsOutput> {
    let filter = queue
        .map(|raw| {
            QueueClass::parse(raw).with_context(|| {
                format!("Unknown queue class '{raw}'. Expected one of: swarm, routine, step")
            })
        })
        .transpose()?;

    let governor =
        ActiveTaskRegistry::new(&config.queues).context("Configured queue limits are invalid")?;

    let queues = QueueClass::ALL
        .into_iter()
        .filter(|q| filter.is_none_or(|f| f == *q))
        .filter_map(|q| {
            governor.limits(q).map(|limits| QueueLimits {
                queue: q,
                limits: limits.clone(),
            })
        })
        .collect();
    Ok(LimitsOutput { queues })
}

pub async fn execute(args: LimitsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let out = effective_limits(config, args.queue.as_deref())?;
    output(&out, json_mode);
    Ok(())
}
