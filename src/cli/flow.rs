use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::config::SnifferConfig;
use crate::flow::{envizom_aqi_flow, Flow};

#[derive(Args, Clone, Debug)]
pub struct FlowArgs {
    /// Flow file to print instead of the configured one
    #[arg(long, value_name = "FILE")]
    pub flow: Option<PathBuf>,
}

pub async fn cmd_flow(args: FlowArgs, config: &SnifferConfig) -> Result<()> {
    let flow = resolve_flow(args.flow.as_ref(), config).await?;
    print!("{}", flow.to_yaml()?);
    Ok(())
}

/// `--flow` beats `run.flow_file`, which beats the built-in dashboard flow.
pub async fn resolve_flow(cli_flow: Option<&PathBuf>, config: &SnifferConfig) -> Result<Flow> {
    match cli_flow.or(config.run.flow_file.as_ref()) {
        Some(path) => {
            let flow = Flow::load(path).await?;
            info!(path = %path.display(), steps = flow.steps.len(), "Loaded flow file");
            Ok(flow)
        }
        None => Ok(envizom_aqi_flow()),
    }
}
