//! swarmgate CLI entry point.

use clap::Parser;

use swarmgate::cli::{commands, handle_error, Cli, Commands};
use swarmgate::infrastructure::config::ConfigLoader;
use swarmgate::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_with_override(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Validate(args) => commands::validate::execute(args, &config, cli.json).await,
        Commands::Limits(args) => commands::limits::execute(args, &config, cli.json).await,
        Commands::Analyze(args) => commands::analyze::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
