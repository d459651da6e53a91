//! Configuration file model.
//!
//! Loaded from YAML (see `cli::runtime::load_config`); every section has defaults so an
//! empty file, or no file at all, yields a runnable configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use capture_report::ReportConfig;
use cdp_adapter::CdpConfig;
use network_capture::CaptureConfig;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub browser: BrowserSettings,
    pub capture: CaptureConfig,
    pub report: ReportConfig,
    pub run: RunSettings,
}

impl SnifferConfig {
    pub fn validate(&self) -> Result<()> {
        self.capture.validate().context("capture section")?;
        self.run.validate().context("run section")?;
        self.report.validate().context("report section")?;
        Ok(())
    }
}

/// Browser overrides layered over [`CdpConfig::default`], which already honours
/// `SNIFFER_HEADLESS` and `SNIFFER_CHROME`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: Option<bool>,
    pub executable: Option<PathBuf>,
    pub websocket_url: Option<String>,
    pub user_data_dir: Option<PathBuf>,
    pub no_sandbox: bool,
    pub command_timeout_ms: u64,
    pub launch_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: None,
            executable: None,
            websocket_url: None,
            user_data_dir: None,
            no_sandbox: false,
            command_timeout_ms: 30_000,
            launch_timeout_ms: 20_000,
        }
    }
}

impl BrowserSettings {
    pub fn to_cdp_config(&self) -> CdpConfig {
        let mut cfg = CdpConfig::default();
        if let Some(headless) = self.headless {
            cfg.headless = headless;
        }
        if let Some(executable) = &self.executable {
            cfg.executable = executable.clone();
        }
        if let Some(dir) = &self.user_data_dir {
            cfg.user_data_dir = dir.clone();
        }
        cfg.websocket_url = self.websocket_url.clone();
        cfg.no_sandbox = self.no_sandbox;
        cfg.default_deadline_ms = self.command_timeout_ms;
        cfg.launch_timeout_ms = self.launch_timeout_ms;
        cfg
    }
}

/// What to do when a run finishes without a single captured call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZeroCapturePolicy {
    #[default]
    Warn,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    pub start_url: String,
    pub aqi_url: String,
    pub email_env: String,
    pub password_env: String,
    pub step_timeout_ms: u64,
    pub zero_capture: ZeroCapturePolicy,
    pub report_on_failure: bool,
    pub run_timeout_ms: Option<u64>,
    pub flow_file: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            start_url: "https://devenvizom.oizom.com/#/login".to_string(),
            aqi_url: "https://devenvizom.oizom.com/#/overview/aqi".to_string(),
            email_env: "ENVIZOM_EMAIL".to_string(),
            password_env: "ENVIZOM_PASSWORD".to_string(),
            step_timeout_ms: 30_000,
            zero_capture: ZeroCapturePolicy::Warn,
            report_on_failure: true,
            run_timeout_ms: None,
            flow_file: None,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("start_url", &self.start_url), ("aqi_url", &self.aqi_url)] {
            Url::parse(value).with_context(|| format!("{field} is not a valid url: {value:?}"))?;
        }
        if self.email_env.trim().is_empty() || self.password_env.trim().is_empty() {
            bail!("credential variable names cannot be empty");
        }
        if self.step_timeout_ms == 0 {
            bail!("step_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: SnifferConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config.run, RunSettings::default());
        assert_eq!(config.capture.hosts, vec!["envdevapi.oizom.com".to_string()]);
        assert!(config.capture.path_allow_list.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let raw = r#"
capture:
  path_allow_list: ["/users/login", "/devices/data"]
  dedup: false
run:
  zero_capture: fail
  run_timeout_ms: 120000
browser:
  headless: false
"#;
        let config: SnifferConfig = serde_yaml::from_str(raw).expect("parse");
        assert_eq!(config.capture.path_allow_list.len(), 2);
        assert!(!config.capture.dedup);
        assert_eq!(config.capture.max_body_chars, 1500);
        assert_eq!(config.run.zero_capture, ZeroCapturePolicy::Fail);
        assert_eq!(config.run.run_timeout_ms, Some(120_000));
        assert_eq!(config.run.email_env, "ENVIZOM_EMAIL");
        assert!(!config.browser.to_cdp_config().headless);
    }

    #[test]
    fn rejects_bad_urls_and_zero_timeouts() {
        let mut config = SnifferConfig::default();
        config.run.start_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.run.step_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_url_width_fails_in_report_section() {
        let raw = "report:\n  url_display_chars: 0\n";
        let config: SnifferConfig = serde_yaml::from_str(raw).expect("parse");
        let err = config.validate().expect_err("zero width");
        assert!(format!("{err:#}").contains("report section"));
        assert!(format!("{err:#}").contains("url_display_chars"));
    }
}
