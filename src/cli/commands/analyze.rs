//! `swarmgate analyze`: emergent pattern report over a JSONL event log.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tracing::warn;

use crate::cli::output::{heading, list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, TierEvent};
use crate::services::{EmergentMonitor, PatternReport, RollingHistory};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Event log with one JSON event per line
    pub events: PathBuf,

    /// History capacity; older events beyond it are evicted before analysis
    #[arg(long)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutput {
    pub lines_read: usize,
    pub skipped: usize,
    pub retained: usize,
    pub report: PatternReport,
}

impl CommandOutput for AnalyzeOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut sections = vec![format!(
            "Analyzed {} event(s) ({} read, {} skipped, {} retained)",
            report.events_analyzed, self.lines_read, self.skipped, self.retained
        )];

        if !report.bottlenecks.is_empty() {
            let mut table = list_table(&["component", "p95 ms", "avg ms", "runs"]);
            for b in &report.bottlenecks {
                table.add_row(vec![
                    b.component.clone(),
                    format!("{:.0}", b.p95_duration),
                    format!("{:.0}", b.avg_duration),
                    b.frequency.to_string(),
                ]);
            }
            sections.push(format!("{}\n{table}", heading("Bottlenecks")));
        }

        if !report.strategy_effectiveness.is_empty() {
            let mut table = list_table(&["strategy", "uses", "success", "avg ms"]);
            for s in &report.strategy_effectiveness {
                table.add_row(vec![
                    s.strategy.clone(),
                    s.usage.to_string(),
                    format!("{:.0}%", s.success_rate * 100.0),
                    format!("{:.0}", s.avg_duration),
                ]);
            }
            sections.push(format!("{}\n{table}", heading("Strategies")));
        }

        if !report.error_clusters.is_empty() {
            let mut table = list_table(&["error", "count", "from", "to", "components"]);
            for c in &report.error_clusters {
                table.add_row(vec![
                    c.error_type.clone(),
                    c.count.to_string(),
                    c.time_window.start.format("%H:%M:%S").to_string(),
                    c.time_window.end.format("%H:%M:%S").to_string(),
                    truncate(&c.components.join(", "), 40),
                ]);
            }
            sections.push(format!("{}\n{table}", heading("Error clusters")));
        }

        let resources = &report.resource_anomalies;
        sections.push(format!(
            "{}\n  Avg credits/step: {:.4}\n  Credit spikes:    {}\n  Exhaustions:      {}",
            heading("Resources"),
            resources.avg_credits_per_step,
            resources.credit_spikes.len(),
            resources.resource_exhaustion
        ));

        let swarm = &report.swarm_behavior;
        if swarm.active_swarms > 0 {
            sections.push(format!(
                "{}\n  Active swarms:      {}\n  Decisions/cycle:    {:.1}\n  Consensus rate:     {:.0}%\n  Adaptations/cycle:  {:.2}",
                heading("Swarm behavior"),
                swarm.active_swarms,
                swarm.avg_decisions_per_cycle,
                swarm.consensus_rate * 100.0,
                swarm.adaptation_frequency
            ));
        }

        if report.recommendations.is_empty() {
            sections.push(console::style("No recommendations.").green().to_string());
        } else {
            let items: Vec<String> = report
                .recommendations
                .iter()
                .map(|r| format!("  - {r}"))
                .collect();
            sections.push(format!("{}\n{}", heading("Recommendations"), items.join("\n")));
        }
        sections.join("\n\n")
    }
}

/// Parse a JSONL event log; blank lines are ignored, malformed lines skipped.
pub fn parse_events(raw: &str) -> (Vec<TierEvent>, usize, usize) {
    let mut events = Vec::new();
    let mut read = 0;
    let mut skipped = 0;
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        read += 1;
        match serde_json::from_str::<TierEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) => {
                skipped += 1;
                warn!(line = index + 1, error = %err, "skipping malformed event");
            }
        }
    }
    (events, read, skipped)
}

pub fn analyze_log(raw: &str, config: &Config, capacity: Option<usize>) -> AnalyzeOutput {
    let (events, lines_read, skipped) = parse_events(raw);
    let history = RollingHistory::new(capacity.unwrap_or(config.history.capacity));
    history.extend(events);

    let monitor = EmergentMonitor::new(config.monitor.clone());
    let report = monitor.analyze(&history.snapshot());
    AnalyzeOutput {
        lines_read,
        skipped,
        retained: history.len(),
        report,
    }
}

pub async fn execute(args: AnalyzeArgs, config: &Config, json_mode: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.events)
        .await
        .with_context(|| format!("Failed to read event log {}", args.events.display()))?;
    let out = analyze_log(&raw, config, args.capacity);
    output(&out, json_mode);
    Ok(())
}
