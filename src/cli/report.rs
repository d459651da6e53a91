use std::path::PathBuf;

use anyhow::{Context, Result};
use capture_report::{read_api_snapshot, Exporter, HtmlExporter, ReportModel};
use clap::Args;
use tracing::info;

use crate::config::SnifferConfig;

#[derive(Args, Clone, Debug)]
pub struct ReportArgs {
    /// JSON snapshot to render (defaults to report.json_path)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// HTML output path (defaults to report.html_path)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report title
    #[arg(long)]
    pub title: Option<String>,
}

pub async fn cmd_report(args: ReportArgs, config: &SnifferConfig) -> Result<()> {
    let input = args.input.unwrap_or_else(|| config.report.json_path.clone());
    let output = args.output.unwrap_or_else(|| config.report.html_path.clone());
    let title = args.title.unwrap_or_else(|| config.report.title.clone());

    let snapshot = read_api_snapshot(&input)
        .await
        .with_context(|| format!("loading snapshot {}", input.display()))?;
    let model = ReportModel::from_api_snapshot(title, &snapshot);
    let stats = HtmlExporter::new(model, config.report.url_display_chars)
        .export(&output)
        .await
        .with_context(|| format!("writing report {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        calls = stats.total_calls,
        phases = stats.phases,
        "Report rendered"
    );
    println!(
        "Rendered {} call(s) in {} phase(s) to {}",
        stats.total_calls,
        stats.phases,
        output.display()
    );
    Ok(())
}
