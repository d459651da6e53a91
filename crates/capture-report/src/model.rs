//! View model shared by the HTML renderer and the snapshot importer.

use chrono::{DateTime, Local};
use network_capture::{CaptureSnapshot, CapturedCall};

use crate::json::ApiSnapshot;

/// Section used for snapshot entries that carry no phase.
pub const UNPHASED_SECTION: &str = "captured";

#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    pub time: String,
    pub status: u16,
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl ReportRow {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

impl From<&CapturedCall> for ReportRow {
    fn from(call: &CapturedCall) -> Self {
        Self {
            time: call.display_time(),
            status: call.status,
            method: call.method.clone(),
            url: call.url.clone(),
            body: call.body_snippet.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportSection {
    pub label: String,
    pub rows: Vec<ReportRow>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportModel {
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub sections: Vec<ReportSection>,
}

impl ReportModel {
    pub fn from_snapshot(title: impl Into<String>, snapshot: &CaptureSnapshot) -> Self {
        let sections = snapshot
            .buckets
            .iter()
            .map(|bucket| ReportSection {
                label: bucket.label.clone(),
                rows: bucket.calls.iter().map(ReportRow::from).collect(),
            })
            .collect();
        Self {
            title: title.into(),
            generated_at: snapshot.generated_at,
            sections,
        }
    }

    /// Groups flat snapshot entries by phase, in order of first appearance.
    pub fn from_api_snapshot(title: impl Into<String>, snapshot: &ApiSnapshot) -> Self {
        let mut sections: Vec<ReportSection> = Vec::new();
        for entry in &snapshot.apis {
            let label = entry
                .phase
                .as_deref()
                .filter(|phase| !phase.trim().is_empty())
                .unwrap_or(UNPHASED_SECTION);
            let row = ReportRow {
                time: entry.time.clone(),
                status: entry.status,
                method: entry.method.clone(),
                url: entry.url.clone(),
                body: None,
            };
            match sections.iter_mut().find(|section| section.label == label) {
                Some(section) => section.rows.push(row),
                None => sections.push(ReportSection {
                    label: label.to_string(),
                    rows: vec![row],
                }),
            }
        }
        let generated_at = DateTime::parse_from_rfc3339(&snapshot.generated_at)
            .map(|ts| ts.with_timezone(&Local))
            .unwrap_or_else(|_| Local::now());
        Self {
            title: title.into(),
            generated_at,
            sections,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.sections.iter().map(|section| section.rows.len()).sum()
    }

    pub fn failed_rows(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|section| section.rows.iter())
            .filter(|row| !row.is_ok())
            .count()
    }
}
