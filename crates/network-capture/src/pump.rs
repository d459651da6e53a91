//! Background task moving observed responses into the capture session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::filter::CaptureFilter;
use crate::normalize::{normalize, NormalizeOptions};
use crate::observer::{NetworkObserver, ResponseDescriptor};
use crate::session::{CaptureSession, RecordOutcome};
use crate::CaptureError;

/// Counters returned when the pump stops.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PumpReport {
    pub processed: u64,
    pub ignored: u64,
    pub recorded: u64,
    pub duplicates: u64,
    pub lagged: u64,
}

/// Handle returned by [`spawn_pump`] for lifecycle control.
pub struct PumpHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<PumpReport>>,
}

impl PumpHandle {
    /// Stop accepting new responses, drain what is already buffered and await the task.
    pub async fn shutdown(mut self) -> Result<PumpReport, CaptureError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(report) => Ok(report),
                Err(err) if err.is_cancelled() => Ok(PumpReport::default()),
                Err(err) => Err(CaptureError::Task(err.to_string())),
            },
            None => Ok(PumpReport::default()),
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Subscribes before returning, so responses emitted after this call are never missed.
pub fn spawn_pump(
    observer: Arc<dyn NetworkObserver>,
    session: Arc<CaptureSession>,
    filter: CaptureFilter,
    options: NormalizeOptions,
) -> PumpHandle {
    let mut stream = observer.subscribe_responses();
    let cancel = CancellationToken::new();
    let loop_token = cancel.clone();

    let task = tokio::spawn(async move {
        let pump = Pump {
            observer,
            session,
            filter,
            options,
        };
        let mut report = PumpReport::default();
        loop {
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => {
                    loop {
                        match stream.try_recv() {
                            Ok(response) => pump.handle(response, &mut report).await,
                            Err(TryRecvError::Lagged(skipped)) => {
                                report.lagged += skipped;
                            }
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                        }
                    }
                    break;
                }
                received = stream.recv() => match received {
                    Ok(response) => pump.handle(response, &mut report).await,
                    Err(RecvError::Lagged(skipped)) => {
                        report.lagged += skipped;
                        warn!(
                            target: "network-capture",
                            skipped,
                            "response stream lagged; some responses were not captured"
                        );
                    }
                    Err(RecvError::Closed) => {
                        debug!(target: "network-capture", "response stream closed");
                        break;
                    }
                },
            }
        }
        info!(
            target: "network-capture",
            processed = report.processed,
            recorded = report.recorded,
            duplicates = report.duplicates,
            ignored = report.ignored,
            lagged = report.lagged,
            "capture pump stopped"
        );
        report
    });

    PumpHandle {
        cancel,
        task: Some(task),
    }
}

struct Pump {
    observer: Arc<dyn NetworkObserver>,
    session: Arc<CaptureSession>,
    filter: CaptureFilter,
    options: NormalizeOptions,
}

impl Pump {
    async fn handle(&self, response: ResponseDescriptor, report: &mut PumpReport) {
        report.processed += 1;
        if !self.filter.should_capture(&response) {
            report.ignored += 1;
            return;
        }
        // Phase is fixed before the body read, which may await for a while.
        let phase = self.session.current_phase();
        let normalized = normalize(&response, self.observer.as_ref(), self.options).await;
        match self.session.record_in(&phase, normalized) {
            RecordOutcome::Recorded => report.recorded += 1,
            RecordOutcome::Duplicate => report.duplicates += 1,
        }
    }
}
