//! Host and path allow-list predicate.

use url::Url;

use crate::config::CaptureConfig;
use crate::observer::ResponseDescriptor;

/// Decides whether an observed response belongs to the backend under watch.
#[derive(Clone, Debug, Default)]
pub struct CaptureFilter {
    hosts: Vec<String>,
    paths: Vec<String>,
}

impl CaptureFilter {
    pub fn new<H, P>(hosts: H, paths: P) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .filter_map(|host| normalize_host(host.as_ref()))
            .collect();
        let paths = paths
            .into_iter()
            .map(|path| path.as_ref().trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        Self { hosts, paths }
    }

    pub fn from_config(cfg: &CaptureConfig) -> Self {
        Self::new(&cfg.hosts, &cfg.path_allow_list)
    }

    pub fn should_capture(&self, response: &ResponseDescriptor) -> bool {
        self.matches_url(&response.url)
    }

    pub fn matches_url(&self, raw: &str) -> bool {
        let Ok(url) = Url::parse(raw) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let authority = url.port().map(|port| format!("{host}:{port}"));

        let host_allowed = self
            .hosts
            .iter()
            .any(|allowed| *allowed == host || authority.as_deref() == Some(allowed.as_str()));
        if !host_allowed {
            return false;
        }

        self.paths.is_empty() || self.paths.iter().any(|needle| url.path().contains(needle))
    }
}

/// Accepts `host`, `host:port` or a full origin such as `https://host/`.
fn normalize_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let authority = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase();
    (!authority.is_empty()).then_some(authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_only() -> CaptureFilter {
        CaptureFilter::new(["envdevapi.oizom.com"], Vec::<String>::new())
    }

    #[test]
    fn host_rule_alone_accepts_any_path() {
        let filter = host_only();
        assert!(filter.matches_url("https://envdevapi.oizom.com/users/login"));
        assert!(filter.matches_url("https://envdevapi.oizom.com/anything?x=1"));
        assert!(!filter.matches_url("https://devenvizom.oizom.com/#/login"));
        assert!(!filter.matches_url("https://cdn.example.com/envdevapi.oizom.com/app.js"));
    }

    #[test]
    fn host_comparison_ignores_case_and_scheme_in_config() {
        let filter = CaptureFilter::new(["HTTPS://EnvDevApi.Oizom.com/"], Vec::<String>::new());
        assert!(filter.matches_url("https://envdevapi.oizom.com/overview/summary"));
    }

    #[test]
    fn path_rule_requires_a_listed_substring() {
        let filter = CaptureFilter::new(
            ["envdevapi.oizom.com"],
            ["/users/login", "/overview", "/devices/data", "/real-time"],
        );
        assert!(filter.matches_url("https://envdevapi.oizom.com/v1/overview/summary"));
        assert!(filter.matches_url("https://envdevapi.oizom.com/devices/data?range=today"));
        assert!(!filter.matches_url("https://envdevapi.oizom.com/settings/profile"));
        // query strings are not part of the path
        assert!(!filter.matches_url("https://envdevapi.oizom.com/settings?next=/overview"));
    }

    #[test]
    fn port_qualified_hosts_match_authority() {
        let filter = CaptureFilter::new(["localhost:8080"], Vec::<String>::new());
        assert!(filter.matches_url("http://localhost:8080/api"));
        assert!(!filter.matches_url("http://localhost:9090/api"));
    }

    #[test]
    fn unparsable_urls_are_rejected() {
        let filter = host_only();
        assert!(!filter.matches_url("not a url"));
        assert!(!filter.matches_url("data:text/plain,hello"));
    }

    #[test]
    fn empty_host_list_captures_nothing() {
        let filter = CaptureFilter::default();
        assert!(!filter.matches_url("https://envdevapi.oizom.com/users/login"));
    }
}
