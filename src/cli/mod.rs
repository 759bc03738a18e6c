//! Command-line interface for inspecting requests, limits and event history.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::analyze::AnalyzeArgs;
use commands::limits::LimitsArgs;
use commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "swarmgate")]
#[command(about = "Tier validation, admission limits and emergent pattern analysis", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .swarmgate/config.yaml)
    #[arg(short, long, global = true, env = "SWARMGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run boundary validation on a JSON request
    Validate(ValidateArgs),
    /// Show effective, validated admission limits
    Limits(LimitsArgs),
    /// Load an event log into a rolling history and report emergent patterns
    Analyze(AnalyzeArgs),
}

/// Print a command failure and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": chain,
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", console::style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  {} {cause}", console::style("caused by:").dim());
        }
    }
    std::process::exit(1);
}
