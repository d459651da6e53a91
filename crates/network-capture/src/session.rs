//! Per-run capture buffer: current phase, ordered buckets, dedup set and waits.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info};
use url::Url;

use crate::config::CaptureConfig;
use crate::model::{dedup_key, CaptureSnapshot, CaptureStats, CapturedCall, PhaseBucket};
use crate::normalize::NormalizedResponse;
use crate::CaptureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    Duplicate,
}

/// Predicate over observed calls used by response waits.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResponseMatcher {
    pub method: Option<String>,
    pub path_contains: Option<String>,
    pub status: Option<u16>,
}

impl ResponseMatcher {
    pub fn path(needle: impl Into<String>) -> Self {
        Self {
            path_contains: Some(needle.into()),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, call: &CapturedCall) -> bool {
        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(&call.method) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if status != call.status {
                return false;
            }
        }
        match &self.path_contains {
            Some(needle) => match Url::parse(&call.url) {
                Ok(url) => url.path().contains(needle.as_str()),
                Err(_) => call.url.contains(needle.as_str()),
            },
            None => true,
        }
    }

    pub fn describe(&self) -> String {
        let mut out = String::from("response");
        out.push(' ');
        out.push_str(self.method.as_deref().unwrap_or("*"));
        out.push(' ');
        match &self.path_contains {
            Some(path) => {
                out.push('*');
                out.push_str(path);
                out.push('*');
            }
            None => out.push('*'),
        }
        if let Some(status) = self.status {
            out.push_str(&format!(" status {status}"));
        }
        out
    }
}

struct SessionState {
    current: String,
    buckets: Vec<PhaseBucket>,
    seen: HashSet<String>,
    stats: CaptureStats,
    last_activity: Instant,
}

impl SessionState {
    fn bucket_mut(&mut self, label: &str) -> &mut PhaseBucket {
        let idx = match self.buckets.iter().position(|bucket| bucket.label == label) {
            Some(idx) => idx,
            None => {
                self.buckets.push(PhaseBucket::new(label));
                self.buckets.len() - 1
            }
        };
        &mut self.buckets[idx]
    }
}

/// Shared via `Arc` between the pump task, the flow driver and the renderer.
pub struct CaptureSession {
    state: Mutex<SessionState>,
    dedup: bool,
    observed: broadcast::Sender<CapturedCall>,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig) -> Self {
        let (observed, _) = broadcast::channel(config.stream_buffer.max(1));
        Self {
            state: Mutex::new(SessionState {
                current: config.initial_phase.clone(),
                buckets: Vec::new(),
                seen: HashSet::new(),
                stats: CaptureStats::default(),
                last_activity: Instant::now(),
            }),
            dedup: config.dedup,
            observed,
        }
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup
    }

    pub fn current_phase(&self) -> String {
        self.state.lock().current.clone()
    }

    /// Makes `label` current and creates its bucket so the phase renders even when empty.
    pub fn set_phase(&self, label: &str) {
        let mut state = self.state.lock();
        state.bucket_mut(label);
        if state.current != label {
            let previous = std::mem::replace(&mut state.current, label.to_string());
            info!(target: "network-capture", from = %previous, phase = %label, "phase changed");
        }
    }

    /// Records into the phase current at the time of this call.
    pub fn record(&self, response: NormalizedResponse) -> RecordOutcome {
        let phase = self.current_phase();
        self.record_in(&phase, response)
    }

    /// Records into `phase`, which the caller read when the response was observed.
    pub fn record_in(&self, phase: &str, response: NormalizedResponse) -> RecordOutcome {
        let (call, outcome) = {
            let mut state = self.state.lock();
            state.stats.observed += 1;
            state.stats.register_status(response.status);
            state.last_activity = Instant::now();

            let call = CapturedCall {
                timestamp: response.timestamp,
                method: response.method,
                url: response.url,
                status: response.status,
                body_snippet: response.body_snippet,
                phase: phase.to_string(),
            };

            let fresh = !self.dedup || state.seen.insert(dedup_key(&call.method, &call.url));
            if fresh {
                state.stats.recorded += 1;
                state.bucket_mut(phase).calls.push(call.clone());
                (call, RecordOutcome::Recorded)
            } else {
                state.stats.duplicates += 1;
                (call, RecordOutcome::Duplicate)
            }
        };

        debug!(
            target: "network-capture",
            phase = %call.phase,
            method = %call.method,
            url = %call.url,
            status = call.status,
            outcome = ?outcome,
            "response observed"
        );
        let _ = self.observed.send(call);
        outcome
    }

    /// Empties the bucket for `label` and forgets the dedup keys of the discarded calls.
    pub fn reset_bucket(&self, label: &str) -> usize {
        let mut state = self.state.lock();
        let discarded: Vec<CapturedCall> = match state
            .buckets
            .iter_mut()
            .find(|bucket| bucket.label == label)
        {
            Some(bucket) => bucket.calls.drain(..).collect(),
            None => Vec::new(),
        };
        if self.dedup {
            for call in &discarded {
                state.seen.remove(&call.dedup_key());
            }
        }
        state.stats.discarded += discarded.len() as u64;
        info!(
            target: "network-capture",
            phase = %label,
            discarded = discarded.len(),
            "bucket reset"
        );
        discarded.len()
    }

    pub fn bucket(&self, label: &str) -> Option<PhaseBucket> {
        let state = self.state.lock();
        state
            .buckets
            .iter()
            .find(|bucket| bucket.label == label)
            .cloned()
    }

    pub fn stats(&self) -> CaptureStats {
        self.state.lock().stats
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        let state = self.state.lock();
        CaptureSnapshot {
            generated_at: chrono::Local::now(),
            buckets: state.buckets.clone(),
            stats: state.stats,
        }
    }

    /// Every filtered response, duplicates included, in record order.
    pub fn subscribe(&self) -> broadcast::Receiver<CapturedCall> {
        self.observed.subscribe()
    }

    /// Resolves with the first call matching `matcher`, either already recorded in the
    /// current phase or observed before `timeout` elapses.
    pub async fn wait_for_response(
        &self,
        matcher: &ResponseMatcher,
        timeout: Duration,
    ) -> Result<CapturedCall, CaptureError> {
        let mut rx = self.observed.subscribe();
        if let Some(hit) = self.find_in_current(matcher) {
            return Ok(hit);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    return Err(CaptureError::WaitTimeout {
                        what: matcher.describe(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Ok(Ok(call)) if matcher.matches(&call) => return Ok(call),
                Ok(Ok(_)) => continue,
                Ok(Err(RecvError::Lagged(_))) => {
                    if let Some(hit) = self.find_in_current(matcher) {
                        return Ok(hit);
                    }
                }
                Ok(Err(RecvError::Closed)) => return Err(CaptureError::ChannelClosed),
            }
        }
    }

    /// Resolves once no filtered response was observed for `quiet` since the wait began,
    /// or after `max_wait`. Returns whether quiet was reached.
    pub async fn wait_for_quiet(&self, quiet: Duration, max_wait: Duration) -> bool {
        let started = Instant::now();
        let deadline = started + max_wait;
        loop {
            let now = Instant::now();
            let last = self.state.lock().last_activity.max(started);
            let idle = now.saturating_duration_since(last);
            if idle >= quiet {
                return true;
            }
            if now >= deadline {
                debug!(
                    target: "network-capture",
                    quiet_ms = quiet.as_millis() as u64,
                    max_ms = max_wait.as_millis() as u64,
                    "quiet window not reached"
                );
                return false;
            }
            let remaining = deadline.saturating_duration_since(now);
            sleep((quiet - idle).min(remaining)).await;
        }
    }

    fn find_in_current(&self, matcher: &ResponseMatcher) -> Option<CapturedCall> {
        let state = self.state.lock();
        state
            .buckets
            .iter()
            .find(|bucket| bucket.label == state.current)
            .and_then(|bucket| bucket.calls.iter().find(|call| matcher.matches(call)))
            .cloned()
    }
}
