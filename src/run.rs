//! One sniffing run: browser up, flow driven, capture drained, report written.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use capture_report::{ReportOutcome, ReportWriter};
use cdp_adapter::{event_bus, CdpAdapter};
use network_capture::{
    spawn_pump, CaptureError, CaptureFilter, CaptureSession, NetworkObserver, PumpReport,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::{spawn_event_logger, CdpPage};
use crate::config::{SnifferConfig, ZeroCapturePolicy};
use crate::credentials::Credentials;
use crate::flow::{Browser, Flow, PhaseDriver, TemplateContext};

#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_calls: usize,
    /// `(phase, calls)` in the order phases were entered.
    pub phases: Vec<(String, usize)>,
    pub empty_phases: Vec<String>,
    pub report: Option<ReportOutcome>,
    pub pump: PumpReport,
    pub steps_completed: usize,
}

/// Launches the browser and runs `flow` against the live dashboard.
pub async fn execute_run(config: &SnifferConfig, flow: &Flow) -> Result<RunSummary> {
    config.validate()?;
    flow.validate().context("invalid flow")?;
    let credentials = Credentials::from_env(&config.run.email_env, &config.run.password_env)
        .context("loading dashboard credentials")?;
    let context = TemplateContext::new(&credentials, &config.run);

    let (bus, _rx) = event_bus(256);
    let adapter = Arc::new(CdpAdapter::new(config.browser.to_cdp_config(), bus));
    if adapter.mode().is_stub() {
        bail!("no Chrome/Chromium available; install one or set SNIFFER_CHROME=/path/to/chrome");
    }
    Arc::clone(&adapter)
        .start()
        .await
        .context("starting browser")?;
    let logger = spawn_event_logger(adapter.subscribe());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "run", "interrupt received; stopping flow");
                cancel.cancel();
            }
        })
    };

    let outcome = match adapter.open_page().await.context("opening page") {
        Ok(page) => {
            let browser: Arc<dyn Browser> = Arc::new(CdpPage::new(Arc::clone(&adapter), page));
            let observer: Arc<dyn NetworkObserver> = adapter.clone();
            capture_flow(config, flow, browser, observer, context, cancel).await
        }
        Err(err) => Err(err),
    };

    interrupt.abort();
    adapter.shutdown().await;
    logger.abort();
    outcome
}

/// Drives `flow` while recording responses from `observer`, then writes the report.
///
/// The report is written even when a step fails if `report_on_failure` is set; the
/// step error is still returned.
pub async fn capture_flow(
    config: &SnifferConfig,
    flow: &Flow,
    browser: Arc<dyn Browser>,
    observer: Arc<dyn NetworkObserver>,
    context: TemplateContext,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let session = Arc::new(CaptureSession::new(&config.capture));
    let pump = spawn_pump(
        observer,
        Arc::clone(&session),
        CaptureFilter::from_config(&config.capture),
        config.capture.normalize_options(),
    );

    info!(
        target: "run",
        flow = %flow.name,
        steps = flow.steps.len(),
        dedup = session.dedup_enabled(),
        "flow starting"
    );
    let mut driver = PhaseDriver::new(
        browser,
        Arc::clone(&session),
        context,
        Duration::from_millis(config.run.step_timeout_ms),
    );
    let run_timeout = config.run.run_timeout_ms.map(Duration::from_millis);
    let driven = drive(&mut driver, flow, run_timeout, &cancel).await;
    if let Err(err) = &driven {
        error!(target: "run", completed = driver.completed(), "flow failed: {err:#}");
    }

    let pump = settle_pump(pump.shutdown().await, driven.is_err())?;
    let snapshot = session.snapshot();
    let empty_phases: Vec<String> = snapshot.empty_phases().map(str::to_string).collect();
    for phase in &empty_phases {
        warn!(target: "run", phase = %phase, "no calls captured in phase");
    }

    let report = if driven.is_ok() || config.run.report_on_failure {
        match ReportWriter::new(config.report.clone()).write(&snapshot).await {
            Ok(outcome) => {
                info!(
                    target: "run",
                    html = %config.report.html_path.display(),
                    total = snapshot.total_calls(),
                    partial = driven.is_err(),
                    "report written"
                );
                Some(outcome)
            }
            Err(err) if driven.is_err() => {
                warn!(target: "run", error = %err, "partial report could not be written");
                None
            }
            Err(err) => return Err(err).context("writing report"),
        }
    } else {
        None
    };

    driven?;

    let total_calls = snapshot.total_calls();
    if total_calls == 0 {
        match config.run.zero_capture {
            ZeroCapturePolicy::Warn => {
                warn!(target: "run", "run finished without capturing any backend call")
            }
            ZeroCapturePolicy::Fail => {
                bail!("no backend calls were captured (zero_capture = fail)")
            }
        }
    }

    Ok(RunSummary {
        total_calls,
        phases: snapshot
            .buckets
            .iter()
            .map(|bucket| (bucket.label.clone(), bucket.calls.len()))
            .collect(),
        empty_phases,
        report,
        pump,
        steps_completed: driver.completed(),
    })
}

async fn drive(
    driver: &mut PhaseDriver,
    flow: &Flow,
    run_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<()> {
    let steps = async {
        match run_timeout {
            Some(limit) => tokio::time::timeout(limit, driver.run(&flow.steps))
                .await
                .map_err(|_| anyhow!("run exceeded run_timeout_ms ({}ms)", limit.as_millis()))?,
            None => driver.run(&flow.steps).await,
        }
    };
    tokio::select! {
        result = steps => result,
        _ = cancel.cancelled() => Err(anyhow!("run interrupted")),
    }
}

/// A pump failure after a failed step is only logged, so the step error and the partial
/// report are kept.
fn settle_pump(
    result: std::result::Result<PumpReport, CaptureError>,
    flow_failed: bool,
) -> Result<PumpReport> {
    match result {
        Ok(report) => Ok(report),
        Err(err) if flow_failed => {
            warn!(target: "run", error = %err, "capture pump did not stop cleanly");
            Ok(PumpReport::default())
        }
        Err(err) => Err(err).context("stopping capture pump"),
    }
}
