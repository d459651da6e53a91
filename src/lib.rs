//! api-sniffer library
//!
//! Exposes the flow driver and run orchestration for integration testing

pub mod browser;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod flow;
pub mod run;

pub use config::{SnifferConfig, ZeroCapturePolicy};
pub use flow::{Browser, ElementTarget, Flow, FlowStep, PhaseDriver, TemplateContext};
pub use run::{capture_flow, execute_run, RunSummary};
