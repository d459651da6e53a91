//! Flat JSON snapshot of captured calls.

use std::path::Path;
use std::time::Instant;

use network_capture::CaptureSnapshot;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::writer::write_output;
use crate::{ExportStats, Exporter, ReportError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSnapshot {
    pub generated_at: String,
    pub total_apis: usize,
    pub apis: Vec<ApiEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiEntry {
    #[serde(default)]
    pub time: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl ApiSnapshot {
    pub fn from_snapshot(snapshot: &CaptureSnapshot) -> Self {
        let apis: Vec<ApiEntry> = snapshot
            .calls()
            .map(|call| ApiEntry {
                time: call.display_time(),
                method: call.method.clone(),
                url: call.url.clone(),
                status: call.status,
                phase: Some(call.phase.clone()),
            })
            .collect();
        Self {
            generated_at: snapshot.generated_at.to_rfc3339(),
            total_apis: apis.len(),
            apis,
        }
    }

    pub fn phase_count(&self) -> usize {
        let mut phases: Vec<&str> = self
            .apis
            .iter()
            .map(|entry| entry.phase.as_deref().unwrap_or_default())
            .collect();
        phases.sort_unstable();
        phases.dedup();
        phases.len()
    }
}

/// Either the current snapshot object or the older bare array of entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Snapshot(ApiSnapshot),
    Entries(Vec<ApiEntry>),
}

impl From<SnapshotFile> for ApiSnapshot {
    fn from(file: SnapshotFile) -> Self {
        match file {
            SnapshotFile::Snapshot(snapshot) => snapshot,
            SnapshotFile::Entries(apis) => ApiSnapshot {
                generated_at: String::new(),
                total_apis: apis.len(),
                apis,
            },
        }
    }
}

pub async fn read_api_snapshot(path: &Path) -> Result<ApiSnapshot, ReportError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReportError::MissingInput(path.to_path_buf()))
        }
        Err(err) => return Err(ReportError::io(path, err)),
    };
    serde_json::from_slice::<SnapshotFile>(&raw)
        .map(ApiSnapshot::from)
        .map_err(|source| ReportError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Export captured calls as the flat JSON snapshot.
pub struct JsonExporter {
    snapshot: ApiSnapshot,
}

impl JsonExporter {
    pub fn new(snapshot: ApiSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_capture(snapshot: &CaptureSnapshot) -> Self {
        Self::new(ApiSnapshot::from_snapshot(snapshot))
    }
}

#[async_trait::async_trait]
impl Exporter for JsonExporter {
    async fn export(&self, output_path: &Path) -> Result<ExportStats, ReportError> {
        let start = Instant::now();
        let json = serde_json::to_string_pretty(&self.snapshot)?;
        write_output(output_path, json.as_bytes()).await?;
        info!(
            target: "capture-report",
            path = %output_path.display(),
            total = self.snapshot.total_apis,
            "json snapshot written"
        );
        Ok(ExportStats {
            total_calls: self.snapshot.total_apis,
            phases: self.snapshot.phase_count(),
            bytes_written: json.len() as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
