//! [`Browser`] over a page of the CDP adapter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cdp_adapter::{Cdp, CdpAdapter, EventStream, PageId, RawEvent, WaitGate};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::flow::{Browser, ElementTarget};

pub struct CdpPage {
    adapter: Arc<CdpAdapter>,
    page: PageId,
}

impl CdpPage {
    pub fn new(adapter: Arc<CdpAdapter>, page: PageId) -> Self {
        Self { adapter, page }
    }

    pub fn page(&self) -> PageId {
        self.page
    }
}

#[async_trait]
impl Browser for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        info!(target: "browser", url = %url, "navigating");
        self.adapter.navigate(self.page, url, timeout).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        self.adapter
            .type_text(self.page, selector, value, timeout)
            .await?;
        Ok(())
    }

    async fn click(&self, target: &ElementTarget, timeout: Duration) -> Result<()> {
        self.adapter
            .click(self.page, target, timeout)
            .await?;
        Ok(())
    }

    async fn wait_for_selector(&self, target: &ElementTarget, timeout: Duration) -> Result<()> {
        self.adapter
            .wait_basic(self.page, WaitGate::Selector(target.clone()), timeout)
            .await?;
        Ok(())
    }

    async fn wait_for_enabled(&self, target: &ElementTarget, timeout: Duration) -> Result<()> {
        self.adapter
            .wait_basic(self.page, WaitGate::Enabled(target.clone()), timeout)
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.adapter.current_url(self.page).await?)
    }
}

/// Mirrors adapter page events into the log until the bus closes.
pub fn spawn_event_logger(mut rx: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(RawEvent::PageLifecycle { page, phase, .. }) => {
                    debug!(target: "browser", ?page, phase = %phase, "lifecycle");
                }
                Ok(RawEvent::PageNavigated { url, .. }) => {
                    info!(target: "browser", url = %url, "page navigated");
                }
                Ok(RawEvent::Error { page, message }) => {
                    warn!(target: "browser", ?page, "page error: {message}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(target: "browser", skipped, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
