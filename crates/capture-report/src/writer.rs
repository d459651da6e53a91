//! Writes the configured report outputs, overwriting previous runs.

use std::path::Path;

use network_capture::CaptureSnapshot;
use tokio::io::AsyncWriteExt;

use crate::html::HtmlExporter;
use crate::json::JsonExporter;
use crate::model::ReportModel;
use crate::{ExportStats, Exporter, ReportConfig, ReportError};

#[derive(Clone, Debug, Default)]
pub struct ReportOutcome {
    pub html: ExportStats,
    pub json: Option<ExportStats>,
}

pub struct ReportWriter {
    config: ReportConfig,
}

impl ReportWriter {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub async fn write(&self, snapshot: &CaptureSnapshot) -> Result<ReportOutcome, ReportError> {
        let model = ReportModel::from_snapshot(&self.config.title, snapshot);
        let html = HtmlExporter::new(model, self.config.url_display_chars)
            .export(&self.config.html_path)
            .await?;
        let json = if self.config.write_json {
            Some(
                JsonExporter::from_capture(snapshot)
                    .export(&self.config.json_path)
                    .await?,
            )
        } else {
            None
        };
        Ok(ReportOutcome { html, json })
    }
}

/// Creates parent directories, then replaces the file contents.
pub(crate) async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| ReportError::io(parent, err))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|err| ReportError::io(path, err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| ReportError::io(path, err))?;
    file.flush().await.map_err(|err| ReportError::io(path, err))
}
