//! Correlates `Network.*` events into completed responses.
//!
//! A response is announced once its body is final: on `loadingFinished`, or on `loadingFailed`
//! when headers had already arrived. Redirect hops are announced when the follow-up
//! `requestWillBeSent` carries the `redirectResponse`. Hops get their own id with no body.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use dashmap::DashMap;
use network_capture::ResponseDescriptor;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AdapterError;

/// Announced responses whose body has not been read yet.
const COMPLETED_CAP: usize = 512;

#[derive(Clone, Debug)]
struct PendingRequest {
    method: String,
    url: String,
    session: Option<String>,
    response: Option<ResponseMeta>,
}

#[derive(Clone, Debug)]
struct ResponseMeta {
    status: u16,
    content_type: Option<String>,
}

#[derive(Default)]
pub struct NetworkLedger {
    pending: DashMap<String, PendingRequest>,
    /// request id -> (sequence, session that can serve `Network.getResponseBody`).
    completed: DashMap<String, (u64, Option<String>)>,
    sequence: AtomicU64,
}

impl NetworkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(
        &self,
        params: Value,
        session: Option<String>,
    ) -> Result<Option<ResponseDescriptor>, AdapterError> {
        let payload: RequestWillBeSentParams = serde_json::from_value(params)?;
        let redirect = match (payload.redirect_response, self.pending.remove(&payload.request_id)) {
            (Some(hop), Some((_, previous))) => Some(ResponseDescriptor {
                request_id: redirect_id(&payload.request_id),
                method: previous.method,
                url: previous.url,
                status: clamp_status(hop.status),
                content_type: hop.content_type(),
                observed_at: Local::now(),
            }),
            _ => None,
        };

        let method = payload
            .request
            .method
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        self.pending.insert(
            payload.request_id,
            PendingRequest {
                method,
                url: payload.request.url,
                session,
                response: None,
            },
        );
        Ok(redirect)
    }

    pub fn on_response(&self, params: Value) -> Result<(), AdapterError> {
        let payload: ResponseReceivedParams = serde_json::from_value(params)?;
        if let Some(mut entry) = self.pending.get_mut(&payload.request_id) {
            entry.response = Some(ResponseMeta {
                status: clamp_status(payload.response.status),
                content_type: payload.response.content_type(),
            });
            if entry.url.is_empty() {
                entry.url = payload.response.url.unwrap_or_default();
            }
        }
        Ok(())
    }

    pub fn on_finished(&self, params: Value) -> Result<Option<ResponseDescriptor>, AdapterError> {
        let payload: LoadingDoneParams = serde_json::from_value(params)?;
        Ok(self.complete(&payload.request_id))
    }

    pub fn on_failed(&self, params: Value) -> Result<Option<ResponseDescriptor>, AdapterError> {
        let payload: LoadingDoneParams = serde_json::from_value(params)?;
        Ok(self.complete(&payload.request_id))
    }

    /// Session to route a body read through. Each announced response can be read once.
    pub fn take_body_session(&self, request_id: &str) -> Option<Option<String>> {
        self.completed
            .remove(request_id)
            .map(|(_, (_, session))| session)
    }

    pub fn clear(&self) {
        self.pending.clear();
        self.completed.clear();
    }

    fn complete(&self, request_id: &str) -> Option<ResponseDescriptor> {
        let (_, request) = self.pending.remove(request_id)?;
        let meta = request.response?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.completed
            .insert(request_id.to_string(), (seq, request.session.clone()));
        if self.completed.len() > COMPLETED_CAP {
            self.evict_oldest();
        }
        Some(ResponseDescriptor {
            request_id: request_id.to_string(),
            method: request.method,
            url: request.url,
            status: meta.status,
            content_type: meta.content_type,
            observed_at: Local::now(),
        })
    }

    fn evict_oldest(&self) {
        let oldest = self
            .completed
            .iter()
            .min_by_key(|entry| entry.value().0)
            .map(|entry| entry.key().clone());
        if let Some(id) = oldest {
            self.completed.remove(&id);
        }
    }
}

fn redirect_id(request_id: &str) -> String {
    format!("{request_id}:redirect")
}

fn clamp_status(status: i64) -> u16 {
    u16::try_from(status).unwrap_or(0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSentParams {
    request_id: String,
    request: RequestInfo,
    redirect_response: Option<ResponseInfo>,
}

#[derive(Debug, Deserialize)]
struct RequestInfo {
    url: String,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedParams {
    request_id: String,
    response: ResponseInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInfo {
    status: i64,
    url: Option<String>,
    mime_type: Option<String>,
    #[serde(default)]
    headers: serde_json::Map<String, Value>,
}

impl ResponseInfo {
    /// Header value wins over `mimeType`, which Chromium fills even for bodiless responses.
    fn content_type(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, value)| value.as_str())
            .map(str::to_string)
            .or_else(|| self.mime_type.clone().filter(|m| !m.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingDoneParams {
    request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str, method: &str, url: &str) -> Value {
        json!({ "requestId": id, "request": { "url": url, "method": method } })
    }

    fn response(id: &str, status: i64, headers: Value) -> Value {
        json!({
            "requestId": id,
            "response": { "status": status, "url": "", "mimeType": "text/plain", "headers": headers }
        })
    }

    #[test]
    fn emits_on_loading_finished_with_header_content_type() {
        let ledger = NetworkLedger::new();
        ledger
            .on_request(
                request("1", "POST", "https://envdevapi.oizom.com/users/login"),
                Some("s1".into()),
            )
            .expect("request");
        ledger
            .on_response(response("1", 200, json!({ "Content-Type": "application/json" })))
            .expect("response");

        let done = ledger
            .on_finished(json!({ "requestId": "1" }))
            .expect("finished")
            .expect("descriptor");
        assert_eq!(done.method, "POST");
        assert_eq!(done.status, 200);
        assert_eq!(done.content_type.as_deref(), Some("application/json"));
        assert_eq!(ledger.take_body_session("1"), Some(Some("s1".into())));
        assert_eq!(ledger.take_body_session("1"), None);
    }

    #[test]
    fn failed_without_response_is_dropped() {
        let ledger = NetworkLedger::new();
        ledger
            .on_request(request("2", "GET", "https://envdevapi.oizom.com/x"), None)
            .expect("request");
        let failed = ledger
            .on_failed(json!({ "requestId": "2", "errorText": "net::ERR_ABORTED" }))
            .expect("failed");
        assert!(failed.is_none());
        assert!(ledger.take_body_session("2").is_none());
    }

    #[test]
    fn failed_after_headers_is_announced() {
        let ledger = NetworkLedger::new();
        ledger
            .on_request(request("3", "GET", "https://envdevapi.oizom.com/x"), None)
            .expect("request");
        ledger
            .on_response(response("3", 500, json!({})))
            .expect("response");
        let failed = ledger
            .on_failed(json!({ "requestId": "3" }))
            .expect("failed")
            .expect("descriptor");
        assert_eq!(failed.status, 500);
        assert_eq!(failed.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn redirect_hop_is_announced() {
        let ledger = NetworkLedger::new();
        ledger
            .on_request(request("4", "GET", "https://envdevapi.oizom.com/old"), None)
            .expect("request");
        let hop = ledger
            .on_request(
                json!({
                    "requestId": "4",
                    "request": { "url": "https://envdevapi.oizom.com/new", "method": "GET" },
                    "redirectResponse": { "status": 302, "headers": {} }
                }),
                None,
            )
            .expect("redirect")
            .expect("hop descriptor");
        assert_eq!(hop.url, "https://envdevapi.oizom.com/old");
        assert_eq!(hop.status, 302);
        assert_eq!(hop.request_id, "4:redirect");
        assert!(ledger.take_body_session(&hop.request_id).is_none());

        ledger
            .on_response(response("4", 200, json!({})))
            .expect("final response");
        let done = ledger
            .on_finished(json!({ "requestId": "4" }))
            .expect("finished")
            .expect("final descriptor");
        assert_eq!(done.url, "https://envdevapi.oizom.com/new");
        assert_eq!(ledger.take_body_session("4"), Some(None));
    }

    #[test]
    fn unread_bodies_are_capped() {
        let ledger = NetworkLedger::new();
        for i in 0..COMPLETED_CAP + 10 {
            let id = i.to_string();
            ledger
                .on_request(request(&id, "GET", "https://cdn.example.com/font.woff2"), None)
                .expect("request");
            ledger
                .on_response(response(&id, 200, json!({})))
                .expect("response");
            ledger
                .on_finished(json!({ "requestId": id }))
                .expect("finished");
        }
        assert_eq!(ledger.completed.len(), COMPLETED_CAP);
        assert!(ledger.take_body_session("0").is_none());
        let newest = (COMPLETED_CAP + 9).to_string();
        assert!(ledger.take_body_session(&newest).is_some());
    }

    #[test]
    fn missing_method_becomes_unknown() {
        let ledger = NetworkLedger::new();
        ledger
            .on_request(
                json!({ "requestId": "5", "request": { "url": "https://envdevapi.oizom.com/y" } }),
                None,
            )
            .expect("request");
        ledger
            .on_response(response("5", 204, json!({})))
            .expect("response");
        let done = ledger
            .on_finished(json!({ "requestId": "5" }))
            .expect("finished")
            .expect("descriptor");
        assert_eq!(done.method, "UNKNOWN");
    }
}
