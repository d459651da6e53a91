//! Turns an observed response into a plain record. Never fails.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DEFAULT_MAX_BODY_CHARS;
use crate::observer::{BodySource, ResponseDescriptor};

pub const NON_JSON_SENTINEL: &str = "Non-JSON response";
pub const UNREADABLE_SENTINEL: &str = "Unable to read response";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub capture_bodies: bool,
    pub max_body_chars: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            capture_bodies: true,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }
}

/// A response ready for recording; the session stamps the phase.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResponse {
    pub timestamp: DateTime<Local>,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body_snippet: Option<String>,
}

pub async fn normalize<B>(
    response: &ResponseDescriptor,
    bodies: &B,
    options: NormalizeOptions,
) -> NormalizedResponse
where
    B: BodySource + ?Sized,
{
    let body_snippet = if options.capture_bodies {
        Some(body_snippet(response, bodies, options.max_body_chars).await)
    } else {
        None
    };

    NormalizedResponse {
        timestamp: response.observed_at,
        method: response.method.clone(),
        url: response.url.clone(),
        status: response.status,
        body_snippet,
    }
}

async fn body_snippet<B>(response: &ResponseDescriptor, bodies: &B, max_chars: usize) -> String
where
    B: BodySource + ?Sized,
{
    if !response
        .content_type
        .as_deref()
        .is_some_and(is_json_content)
    {
        return NON_JSON_SENTINEL.to_string();
    }

    let raw = match bodies.read_body(&response.request_id).await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(
                target: "network-capture",
                url = %response.url,
                error = %err,
                "body read failed"
            );
            return UNREADABLE_SENTINEL.to_string();
        }
    };

    let pretty = serde_json::from_str::<serde_json::Value>(&raw)
        .and_then(|value| serde_json::to_string_pretty(&value));
    match pretty {
        Ok(pretty) => truncate_chars(&pretty, max_chars),
        Err(err) => {
            debug!(
                target: "network-capture",
                url = %response.url,
                error = %err,
                "body is not valid JSON"
            );
            UNREADABLE_SENTINEL.to_string()
        }
    }
}

pub fn is_json_content(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence == "text/json" || essence.ends_with("+json")
}

/// Keeps at most `max_chars` characters, cutting on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
