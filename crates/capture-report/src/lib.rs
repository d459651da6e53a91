//! Report rendering for captured API calls.
//!
//! The HTML report groups calls by phase in snapshot order. The JSON snapshot keeps the
//! flat `{ generatedAt, totalApis, apis }` layout so earlier tooling can still read it, and
//! a snapshot can be rendered back into HTML with [`ReportModel::from_api_snapshot`].

pub mod escape;
pub mod html;
pub mod json;
pub mod model;
pub mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use html::{render_html, HtmlExporter};
pub use json::{read_api_snapshot, ApiEntry, ApiSnapshot, JsonExporter};
pub use model::{ReportModel, ReportRow, ReportSection, UNPHASED_SECTION};
pub use writer::{ReportOutcome, ReportWriter};

pub const DEFAULT_REPORT_TITLE: &str = "Envizom API Monitor";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("input not found: {0}")]
    MissingInput(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid report config: {0}")]
    InvalidConfig(String),
}

impl ReportError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Base trait for report exporters.
#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, output_path: &Path) -> Result<ExportStats, ReportError>;
}

/// Statistics from export operations.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportStats {
    pub total_calls: usize,
    pub phases: usize,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub html_path: PathBuf,
    pub json_path: PathBuf,
    pub write_json: bool,
    /// URLs longer than this are shortened in the table; the link keeps the full URL.
    pub url_display_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_REPORT_TITLE.to_string(),
            html_path: PathBuf::from("docs/index.html"),
            json_path: PathBuf::from("discovered-apis/apis.json"),
            write_json: true,
            url_display_chars: 96,
        }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.html_path.as_os_str().is_empty() {
            return Err(ReportError::InvalidConfig("html_path cannot be empty".into()));
        }
        if self.write_json && self.json_path.as_os_str().is_empty() {
            return Err(ReportError::InvalidConfig(
                "json_path cannot be empty while write_json is enabled".into(),
            ));
        }
        // the shortened form always ends with the ellipsis, which takes one char
        if self.url_display_chars == 0 {
            return Err(ReportError::InvalidConfig(
                "url_display_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
