//! Captured call records and the read-only snapshot handed to renderers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One backend call recorded under a phase. Never mutated after it is appended.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CapturedCall {
    pub timestamp: DateTime<Local>,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body_snippet: Option<String>,
    pub phase: String,
}

impl CapturedCall {
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.method, &self.url)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

pub(crate) fn dedup_key(method: &str, url: &str) -> String {
    format!("{method} {url}")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhaseBucket {
    pub label: String,
    pub calls: Vec<CapturedCall>,
}

impl PhaseBucket {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            calls: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Cumulative per-session counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureStats {
    pub observed: u64,
    pub recorded: u64,
    pub duplicates: u64,
    pub discarded: u64,
    pub res2xx: u64,
    pub res4xx: u64,
    pub res5xx: u64,
}

impl CaptureStats {
    pub(crate) fn register_status(&mut self, status: u16) {
        match status {
            200..=299 => self.res2xx += 1,
            400..=499 => self.res4xx += 1,
            500..=599 => self.res5xx += 1,
            _ => {}
        }
    }
}

/// Buckets in the order their phases were first entered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub generated_at: DateTime<Local>,
    pub buckets: Vec<PhaseBucket>,
    pub stats: CaptureStats,
}

impl CaptureSnapshot {
    pub fn total_calls(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.calls.len()).sum()
    }

    pub fn bucket(&self, label: &str) -> Option<&PhaseBucket> {
        self.buckets.iter().find(|bucket| bucket.label == label)
    }

    pub fn calls(&self) -> impl Iterator<Item = &CapturedCall> {
        self.buckets.iter().flat_map(|bucket| bucket.calls.iter())
    }

    pub fn empty_phases(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .iter()
            .filter(|bucket| bucket.is_empty())
            .map(|bucket| bucket.label.as_str())
    }
}
