//! UI flows: ordered steps that drive the page and move the capture between phases.

pub mod default_flow;
pub mod executor;
pub mod template;

use std::path::Path;

use anyhow::{bail, Context, Result};
use cdp_adapter::QuerySpec;
use serde::{Deserialize, Serialize};

pub use default_flow::envizom_aqi_flow;
pub use executor::{Browser, PhaseDriver};
pub use template::TemplateContext;

/// Element addressed by a click or wait step.
pub type ElementTarget = QuerySpec;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FlowStep {
    Phase {
        label: String,
    },
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Goto {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Fill {
        selector: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Click {
        target: ElementTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForSelector {
        target: ElementTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForEnabled {
        target: ElementTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForUrl {
        contains: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_contains: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Settle {
        quiet_ms: u64,
        max_ms: u64,
    },
    Sleep {
        ms: u64,
    },
}

impl FlowStep {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowStep::Phase { .. } => "phase",
            FlowStep::Reset { .. } => "reset",
            FlowStep::Goto { .. } => "goto",
            FlowStep::Fill { .. } => "fill",
            FlowStep::Click { .. } => "click",
            FlowStep::WaitForSelector { .. } => "wait_for_selector",
            FlowStep::WaitForEnabled { .. } => "wait_for_enabled",
            FlowStep::WaitForUrl { .. } => "wait_for_url",
            FlowStep::WaitForResponse { .. } => "wait_for_response",
            FlowStep::Settle { .. } => "settle",
            FlowStep::Sleep { .. } => "sleep",
        }
    }

    /// Human form used in logs and errors. Never includes fill values.
    pub fn describe(&self) -> String {
        match self {
            FlowStep::Phase { label } => format!("phase {label:?}"),
            FlowStep::Reset { label: Some(label) } => format!("reset {label:?}"),
            FlowStep::Reset { label: None } => "reset current phase".to_string(),
            FlowStep::Goto { url, .. } => format!("goto {url}"),
            FlowStep::Fill { selector, .. } => format!("fill {selector:?}"),
            FlowStep::Click { target, .. } => format!("click {}", target.describe()),
            FlowStep::WaitForSelector { target, .. } => {
                format!("wait_for_selector {}", target.describe())
            }
            FlowStep::WaitForEnabled { target, .. } => {
                format!("wait_for_enabled {}", target.describe())
            }
            FlowStep::WaitForUrl { contains, .. } => format!("wait_for_url {contains:?}"),
            FlowStep::WaitForResponse {
                method,
                path_contains,
                status,
                ..
            } => {
                let mut out = format!(
                    "wait_for_response {} {}",
                    method.as_deref().unwrap_or("*"),
                    path_contains.as_deref().unwrap_or("*")
                );
                if let Some(status) = status {
                    out.push_str(&format!(" {status}"));
                }
                out
            }
            FlowStep::Settle { quiet_ms, max_ms } => format!("settle {quiet_ms}ms/{max_ms}ms"),
            FlowStep::Sleep { ms } => format!("sleep {ms}ms"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    #[serde(default)]
    pub name: String,
    pub steps: Vec<FlowStep>,
}

impl Flow {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading flow file {}", path.display()))?;
        let flow: Flow = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing flow file {}", path.display()))?;
        flow.validate()
            .with_context(|| format!("validating flow file {}", path.display()))?;
        Ok(flow)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("flow has no steps");
        }
        for (idx, step) in self.steps.iter().enumerate() {
            let empty = match step {
                FlowStep::Phase { label } => label.trim().is_empty(),
                FlowStep::Goto { url, .. } => url.trim().is_empty(),
                FlowStep::Fill { selector, .. } => selector.trim().is_empty(),
                FlowStep::Click { target, .. }
                | FlowStep::WaitForSelector { target, .. }
                | FlowStep::WaitForEnabled { target, .. } => target.selector.trim().is_empty(),
                FlowStep::WaitForUrl { contains, .. } => contains.is_empty(),
                FlowStep::Settle { quiet_ms, max_ms } => *quiet_ms > *max_ms,
                _ => false,
            };
            if empty {
                bail!("flow step {} ({}) is incomplete", idx + 1, step.kind());
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serializing flow")
    }
}
