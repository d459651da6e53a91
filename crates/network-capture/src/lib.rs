//! Phase-tagged capture of backend HTTP responses.
//!
//! A [`NetworkObserver`] publishes every response the page sees. The pump filters those
//! against the configured backend hosts, normalizes them into [`model::CapturedCall`]s and
//! records them into the bucket of the phase that is current at record time. The session
//! owns buckets, dedup state and the counters used by quiet and response waits.

pub mod config;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod observer;
pub mod pump;
pub mod session;

use thiserror::Error;

pub use config::CaptureConfig;
pub use filter::CaptureFilter;
pub use model::{CaptureSnapshot, CaptureStats, CapturedCall, PhaseBucket};
pub use normalize::{normalize, NormalizeOptions, NormalizedResponse};
pub use observer::{
    BodySource, InMemoryObserver, NetworkObserver, ResponseDescriptor, ResponseStream,
};
pub use pump::{spawn_pump, PumpHandle, PumpReport};
pub use session::{CaptureSession, RecordOutcome, ResponseMatcher};

/// Errors emitted by the capture surface.
#[derive(Clone, Debug, Error)]
pub enum CaptureError {
    #[error("response body unavailable for request {request_id}: {reason}")]
    BodyUnavailable { request_id: String, reason: String },
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    WaitTimeout { what: String, timeout_ms: u64 },
    #[error("channel closed")]
    ChannelClosed,
    #[error("invalid capture config: {0}")]
    InvalidConfig(String),
    #[error("capture task failed: {0}")]
    Task(String),
}
