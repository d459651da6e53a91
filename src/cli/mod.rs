pub mod app;
pub mod commands;
pub mod dispatch;
pub mod env;
pub mod flow;
pub mod report;
pub mod run;
pub mod runtime;

pub use flow::{cmd_flow, FlowArgs};
pub use report::{cmd_report, ReportArgs};
pub use run::{cmd_run, RunArgs};
