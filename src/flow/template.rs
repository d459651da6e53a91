//! `{placeholder}` expansion for flow step values.

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Timelike};

use crate::config::RunSettings;
use crate::credentials::Credentials;

#[derive(Clone)]
pub struct TemplateContext {
    pub email: String,
    pub password: String,
    pub start_url: String,
    pub aqi_url: String,
    pub now: DateTime<Local>,
}

impl TemplateContext {
    pub fn new(credentials: &Credentials, run: &RunSettings) -> Self {
        Self {
            email: credentials.email.clone(),
            password: credentials.password.clone(),
            start_url: run.start_url.clone(),
            aqi_url: run.aqi_url.clone(),
            now: Local::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Local>) -> Self {
        self.now = now;
        self
    }

    /// Replaces every `{name}` in `input`. `{{` and `}}` produce literal braces.
    pub fn expand(&self, input: &str) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                bail!("unbalanced '}}' in {input:?}");
            }
            let Some(end) = tail.find('}') else {
                bail!("unterminated placeholder in {input:?}");
            };
            out.push_str(&self.resolve(&tail[1..end])?);
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn resolve(&self, name: &str) -> Result<String> {
        let value = match name {
            "email" => self.email.clone(),
            "password" => self.password.clone(),
            "start_url" => self.start_url.clone(),
            "aqi_url" => self.aqi_url.clone(),
            "previous_hour" => previous_hour_label(self.now.hour()),
            other => match other.strip_prefix("env:") {
                Some(var) => match std::env::var(var) {
                    Ok(value) => value,
                    Err(_) => bail!("placeholder {{{other}}} refers to unset variable {var}"),
                },
                None => bail!("unknown placeholder {{{other}}}"),
            },
        };
        Ok(value)
    }
}

impl std::fmt::Debug for TemplateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateContext")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("start_url", &self.start_url)
            .field("aqi_url", &self.aqi_url)
            .field("now", &self.now)
            .finish()
    }
}

/// The hour before `hour` (0-23) as it is printed on a 12-hour clock face.
pub fn previous_hour_label(hour: u32) -> String {
    let previous = (hour % 24 + 23) % 24;
    match previous % 12 {
        0 => "12".to_string(),
        face => face.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serial_test::serial;

    fn context() -> TemplateContext {
        TemplateContext {
            email: "ops@example.com".into(),
            password: "pw".into(),
            start_url: "https://dash.example/#/login".into(),
            aqi_url: "https://dash.example/#/overview/aqi".into(),
            now: Local
                .with_ymd_and_hms(2024, 3, 1, 14, 5, 0)
                .single()
                .expect("valid local time"),
        }
    }

    #[test]
    fn expands_known_placeholders() {
        let ctx = context();
        assert_eq!(ctx.expand("{email}").unwrap(), "ops@example.com");
        assert_eq!(ctx.expand("go {aqi_url} now").unwrap(), "go https://dash.example/#/overview/aqi now");
        assert_eq!(ctx.expand("{previous_hour}").unwrap(), "1");
        assert_eq!(ctx.expand("plain text").unwrap(), "plain text");
        assert_eq!(ctx.expand("{{literal}}").unwrap(), "{literal}");
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        let ctx = context();
        assert!(ctx.expand("{nope}").is_err());
        assert!(ctx.expand("{email").is_err());
        assert!(ctx.expand("a } b").is_err());
    }

    #[test]
    #[serial]
    fn env_placeholder_reads_variable() {
        std::env::set_var("SNIFFER_TEMPLATE_SITE", "north-yard");
        let ctx = context();
        assert_eq!(ctx.expand("{env:SNIFFER_TEMPLATE_SITE}").unwrap(), "north-yard");
        std::env::remove_var("SNIFFER_TEMPLATE_SITE");
        assert!(ctx.expand("{env:SNIFFER_TEMPLATE_SITE}").is_err());
    }

    #[test]
    fn previous_hour_wraps_on_clock_face() {
        assert_eq!(previous_hour_label(0), "11");
        assert_eq!(previous_hour_label(1), "12");
        assert_eq!(previous_hour_label(12), "11");
        assert_eq!(previous_hour_label(13), "12");
        assert_eq!(previous_hour_label(14), "1");
        assert_eq!(previous_hour_label(23), "10");
    }

    #[test]
    fn debug_hides_password() {
        assert!(!format!("{:?}", context()).contains("\"pw\""));
    }
}
