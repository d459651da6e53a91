//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};

/// Describes which element an interaction targets.
///
/// Elements are matched by CSS `selector`, then optionally narrowed to those whose trimmed,
/// case-insensitive text contains `text` (or equals it when `exact`). `nth` picks one of the
/// remaining matches; negative indices count from the end.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuerySpec {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<i64>,
}

impl QuerySpec {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn nth(mut self, index: i64) -> Self {
        self.nth = Some(index);
        self
    }

    /// Short human form used in errors and logs, e.g. `button "LOG IN" #0`.
    pub fn describe(&self) -> String {
        let mut out = self.selector.clone();
        if let Some(text) = &self.text {
            out.push_str(&format!(" {}\"{}\"", if self.exact { "=" } else { "~" }, text));
        }
        if let Some(nth) = self.nth {
            out.push_str(&format!(" #{nth}"));
        }
        out
    }
}

/// Center point of a resolved element.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
    pub disabled: bool,
}

/// Conditions accepted by [`crate::Cdp::wait_basic`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum WaitGate {
    DomReady,
    Selector(QuerySpec),
    Enabled(QuerySpec),
    UrlContains(String),
}

impl WaitGate {
    pub fn describe(&self) -> String {
        match self {
            WaitGate::DomReady => "document ready".to_string(),
            WaitGate::Selector(spec) => format!("selector {}", spec.describe()),
            WaitGate::Enabled(spec) => format!("enabled {}", spec.describe()),
            WaitGate::UrlContains(fragment) => format!("url containing {fragment:?}"),
        }
    }
}
