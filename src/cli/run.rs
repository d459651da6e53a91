use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::flow::resolve_flow;
use crate::config::SnifferConfig;
use crate::run::{execute_run, RunSummary};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Flow file to drive instead of the built-in dashboard flow
    #[arg(long, value_name = "FILE")]
    pub flow: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Skip the JSON snapshot
    #[arg(long)]
    pub no_json: bool,

    /// HTML report path
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub async fn cmd_run(args: RunArgs, mut config: SnifferConfig) -> Result<()> {
    if args.headful {
        config.browser.headless = Some(false);
    }
    if args.no_json {
        config.report.write_json = false;
    }
    if let Some(output) = args.output {
        config.report.html_path = output;
    }
    let flow = resolve_flow(args.flow.as_ref(), &config).await?;

    let summary = execute_run(&config, &flow).await?;
    print_summary(&summary, &config);
    Ok(())
}

fn print_summary(summary: &RunSummary, config: &SnifferConfig) {
    println!("Captured {} API call(s)", summary.total_calls);
    for (phase, calls) in &summary.phases {
        println!("  {phase:<16} {calls}");
    }
    if summary.report.is_some() {
        println!("HTML report: {}", config.report.html_path.display());
        if config.report.write_json {
            println!("JSON snapshot: {}", config.report.json_path.display());
        }
    }
}
