use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use network_capture::{CaptureSession, ResponseMatcher};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::template::TemplateContext;
use super::{ElementTarget, FlowStep};

const URL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Page operations a flow needs. Implemented over the CDP adapter and by test doubles.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;
    async fn click(&self, target: &ElementTarget, timeout: Duration) -> Result<()>;
    async fn wait_for_selector(&self, target: &ElementTarget, timeout: Duration) -> Result<()>;
    async fn wait_for_enabled(&self, target: &ElementTarget, timeout: Duration) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
}

/// Runs flow steps against a browser while steering the capture session's phases.
pub struct PhaseDriver {
    browser: Arc<dyn Browser>,
    session: Arc<CaptureSession>,
    context: TemplateContext,
    default_timeout: Duration,
    completed: usize,
}

impl PhaseDriver {
    pub fn new(
        browser: Arc<dyn Browser>,
        session: Arc<CaptureSession>,
        context: TemplateContext,
        default_timeout: Duration,
    ) -> Self {
        Self {
            browser,
            session,
            context,
            default_timeout,
            completed: 0,
        }
    }

    /// Number of steps that finished successfully so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub async fn run(&mut self, steps: &[FlowStep]) -> Result<()> {
        for (idx, step) in steps.iter().enumerate() {
            let started = Instant::now();
            debug!(target: "flow", step = idx + 1, kind = step.kind(), "running {}", step.describe());
            self.execute(step)
                .await
                .with_context(|| format!("flow step {} ({})", idx + 1, step.describe()))?;
            self.completed += 1;
            debug!(
                target: "flow",
                step = idx + 1,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "step done"
            );
        }
        Ok(())
    }

    fn timeout(&self, step_timeout: Option<u64>) -> Duration {
        step_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    fn expand_target(&self, target: &ElementTarget) -> Result<ElementTarget> {
        let mut expanded = target.clone();
        expanded.selector = self.context.expand(&target.selector)?;
        if let Some(text) = &target.text {
            expanded.text = Some(self.context.expand(text)?);
        }
        Ok(expanded)
    }

    async fn execute(&self, step: &FlowStep) -> Result<()> {
        match step {
            FlowStep::Phase { label } => {
                self.session.set_phase(label);
                info!(target: "flow", phase = %label, "phase started");
            }
            FlowStep::Reset { label } => {
                let label = label.clone().unwrap_or_else(|| self.session.current_phase());
                let dropped = self.session.reset_bucket(&label);
                debug!(target: "flow", phase = %label, dropped, "reset step done");
            }
            FlowStep::Goto { url, timeout_ms } => {
                let url = self.context.expand(url)?;
                self.browser.navigate(&url, self.timeout(*timeout_ms)).await?;
            }
            FlowStep::Fill {
                selector,
                value,
                timeout_ms,
            } => {
                let selector = self.context.expand(selector)?;
                let value = self.context.expand(value)?;
                self.browser
                    .fill(&selector, &value, self.timeout(*timeout_ms))
                    .await?;
            }
            FlowStep::Click { target, timeout_ms } => {
                let target = self.expand_target(target)?;
                self.browser.click(&target, self.timeout(*timeout_ms)).await?;
            }
            FlowStep::WaitForSelector { target, timeout_ms } => {
                let target = self.expand_target(target)?;
                self.browser
                    .wait_for_selector(&target, self.timeout(*timeout_ms))
                    .await?;
            }
            FlowStep::WaitForEnabled { target, timeout_ms } => {
                let target = self.expand_target(target)?;
                self.browser
                    .wait_for_enabled(&target, self.timeout(*timeout_ms))
                    .await?;
            }
            FlowStep::WaitForUrl {
                contains,
                timeout_ms,
            } => {
                let needle = self.context.expand(contains)?;
                self.wait_for_url(&needle, self.timeout(*timeout_ms)).await?;
            }
            FlowStep::WaitForResponse {
                method,
                path_contains,
                status,
                timeout_ms,
            } => {
                let matcher = ResponseMatcher {
                    method: method.clone(),
                    path_contains: path_contains.clone(),
                    status: *status,
                };
                let call = self
                    .session
                    .wait_for_response(&matcher, self.timeout(*timeout_ms))
                    .await?;
                info!(
                    target: "flow",
                    method = %call.method,
                    status = call.status,
                    url = %call.url,
                    "awaited response arrived"
                );
            }
            FlowStep::Settle { quiet_ms, max_ms } => {
                let quiet = self
                    .session
                    .wait_for_quiet(Duration::from_millis(*quiet_ms), Duration::from_millis(*max_ms))
                    .await;
                if !quiet {
                    warn!(
                        target: "flow",
                        quiet_ms,
                        max_ms,
                        "network did not settle; continuing"
                    );
                }
            }
            FlowStep::Sleep { ms } => sleep(Duration::from_millis(*ms)).await,
        }
        Ok(())
    }

    async fn wait_for_url(&self, needle: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last = String::new();
        loop {
            match self.browser.current_url().await {
                Ok(url) if url.contains(needle) => return Ok(()),
                Ok(url) => last = url,
                Err(err) => debug!(target: "flow", error = %err, "current url unavailable"),
            }
            if Instant::now() >= deadline {
                bail!(
                    "url did not contain {needle:?} within {}ms (last seen {last:?})",
                    timeout.as_millis()
                );
            }
            sleep(URL_POLL_INTERVAL).await;
        }
    }
}
