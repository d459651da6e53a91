use clap::Subcommand;

use super::flow::FlowArgs;
use super::report::ReportArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Log in, drive the dashboard flow and report the captured API calls
    Run(RunArgs),

    /// Render the HTML report from a saved JSON snapshot
    Report(ReportArgs),

    /// Print the effective flow as YAML
    Flow(FlowArgs),
}
