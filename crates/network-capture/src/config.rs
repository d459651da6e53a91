//! Configuration types for response capture.

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizeOptions;
use crate::CaptureError;

pub const DEFAULT_BACKEND_HOST: &str = "envdevapi.oizom.com";
pub const DEFAULT_MAX_BODY_CHARS: usize = 1500;
/// Smallest body limit accepted; keeps both sentinels intact.
pub const MIN_BODY_CHARS: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend hosts whose responses are captured. `host` or `host:port`.
    pub hosts: Vec<String>,
    /// Path substrings a captured URL must contain. Empty keeps every path.
    pub path_allow_list: Vec<String>,
    /// Skip a `method + url` pair that was already recorded in this run.
    pub dedup: bool,
    pub capture_bodies: bool,
    pub max_body_chars: usize,
    /// Phase that collects calls observed before the first `set_phase`.
    pub initial_phase: String,
    pub stream_buffer: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_BACKEND_HOST.to_string()],
            path_allow_list: Vec::new(),
            dedup: true,
            capture_bodies: true,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            initial_phase: "startup".to_string(),
            stream_buffer: 512,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.hosts.iter().all(|host| host.trim().is_empty()) {
            return Err(CaptureError::InvalidConfig(
                "at least one backend host is required".into(),
            ));
        }
        if self.max_body_chars < MIN_BODY_CHARS {
            return Err(CaptureError::InvalidConfig(format!(
                "max_body_chars must be at least {MIN_BODY_CHARS} (got {})",
                self.max_body_chars
            )));
        }
        if self.initial_phase.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "initial_phase cannot be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            capture_bodies: self.capture_bodies,
            max_body_chars: self.max_body_chars,
        }
    }
}
