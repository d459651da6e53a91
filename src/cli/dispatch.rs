use std::path::Path;

use super::env::CliArgs;
use super::flow::cmd_flow;
use super::report::cmd_report;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::config::SnifferConfig;
use anyhow::Result;

pub async fn dispatch(
    cli: &CliArgs,
    config: SnifferConfig,
    config_path: Option<&Path>,
) -> Result<()> {
    if let Some(path) = config_path {
        tracing::debug!(config = %path.display(), "dispatching with loaded config");
    }
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, config).await,
        Commands::Report(args) => cmd_report(args, &config).await,
        Commands::Flow(args) => cmd_flow(args, &config).await,
    }
}
