//! Seam between the browser driver and the capture core.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::CaptureError;

/// One completed response as seen by the page.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResponseDescriptor {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub observed_at: DateTime<Local>,
}

impl ResponseDescriptor {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            status,
            content_type: None,
            observed_at: Local::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

pub type ResponseStream = broadcast::Receiver<ResponseDescriptor>;

/// Reads the body of a response previously announced on a [`ResponseStream`].
#[async_trait]
pub trait BodySource: Send + Sync {
    async fn read_body(&self, request_id: &str) -> Result<String, CaptureError>;
}

/// Source of observed responses plus the matching body reads.
pub trait NetworkObserver: BodySource {
    fn subscribe_responses(&self) -> ResponseStream;
}

/// Observer fed by hand. Used by tests and by dry runs that replay known traffic.
pub struct InMemoryObserver {
    tx: broadcast::Sender<ResponseDescriptor>,
    bodies: DashMap<String, Result<String, String>>,
}

impl InMemoryObserver {
    pub fn new(buffer: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Arc::new(Self {
            tx,
            bodies: DashMap::new(),
        })
    }

    /// Announce a response with no readable body.
    pub fn emit(&self, response: ResponseDescriptor) {
        let _ = self.tx.send(response);
    }

    pub fn emit_with_body(&self, response: ResponseDescriptor, body: impl Into<String>) {
        self.bodies
            .insert(response.request_id.clone(), Ok(body.into()));
        self.emit(response);
    }

    /// Announce a response whose body read will fail with `reason`.
    pub fn emit_with_body_error(&self, response: ResponseDescriptor, reason: impl Into<String>) {
        self.bodies
            .insert(response.request_id.clone(), Err(reason.into()));
        self.emit(response);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl BodySource for InMemoryObserver {
    async fn read_body(&self, request_id: &str) -> Result<String, CaptureError> {
        match self.bodies.get(request_id).map(|entry| entry.value().clone()) {
            Some(Ok(body)) => Ok(body),
            Some(Err(reason)) => Err(CaptureError::BodyUnavailable {
                request_id: request_id.to_string(),
                reason,
            }),
            None => Err(CaptureError::BodyUnavailable {
                request_id: request_id.to_string(),
                reason: "no body recorded".into(),
            }),
        }
    }
}

impl NetworkObserver for InMemoryObserver {
    fn subscribe_responses(&self) -> ResponseStream {
        self.tx.subscribe()
    }
}
