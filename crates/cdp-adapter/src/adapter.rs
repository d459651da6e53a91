//! Adapter over a [`CdpTransport`]: page bookkeeping, DOM interaction, and response capture.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use network_capture::{BodySource, CaptureError, NetworkObserver, ResponseDescriptor, ResponseStream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{Anchor, QuerySpec, WaitGate};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::{BrowserId, PageId, SessionId};
use crate::network::NetworkLedger;
use crate::registry::Registry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};
use crate::{chrome_mode, resolve_chrome_path, AdapterMode, ChromeMode};

pub type EventBus = broadcast::Sender<RawEvent>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Browser operations the sniffer needs from a page.
#[async_trait]
pub trait Cdp: Send + Sync {
    async fn navigate(&self, page: PageId, url: &str, deadline: Duration) -> Result<(), AdapterError>;
    async fn query(&self, page: PageId, spec: &QuerySpec) -> Result<Vec<Anchor>, AdapterError>;
    async fn click(&self, page: PageId, spec: &QuerySpec, deadline: Duration) -> Result<(), AdapterError>;
    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError>;
    async fn evaluate_script(&self, page: PageId, expression: &str) -> Result<Value, AdapterError>;
    async fn wait_basic(&self, page: PageId, gate: WaitGate, timeout: Duration) -> Result<(), AdapterError>;
    async fn enable_network(&self, page: PageId) -> Result<(), AdapterError>;
    async fn current_url(&self, page: PageId) -> Result<String, AdapterError>;
}

/// Adapter implementation with pluggable transport.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    mode: AdapterMode,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    network: NetworkLedger,
    responses: broadcast::Sender<ResponseDescriptor>,
}

impl CdpAdapter {
    pub fn new(mut cfg: CdpConfig, bus: EventBus) -> Self {
        let mode = chrome_mode();
        let detected = resolve_chrome_path(&cfg);
        let mut stub_reason = matches!(mode, ChromeMode::ForceStub).then_some("forced_stub_mode");
        let mut use_real = stub_reason.is_none()
            && (cfg.websocket_url.is_some() || matches!(mode, ChromeMode::ForceReal) || detected.is_some());

        if use_real && cfg.websocket_url.is_none() {
            match detected {
                Some(path) => cfg.executable = path,
                None => {
                    use_real = false;
                    stub_reason = Some("chrome_not_found");
                }
            }
        }

        let transport: Arc<dyn CdpTransport> = if use_real {
            info!(target: "cdp-adapter", executable = %cfg.executable.display(), "using real Chromium transport");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-adapter",
                mode = %AdapterMode::Stub.as_str(),
                reason = stub_reason.unwrap_or("unknown"),
                remediation = "Install Chrome/Chromium or set SNIFFER_CHROME=/path/to/chrome",
                "CDP adapter initialized without a real browser"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(cfg: CdpConfig, bus: EventBus, transport: Arc<dyn CdpTransport>) -> Self {
        let (responses, _) = broadcast::channel(cfg.response_buffer.max(16));
        let mode = transport.mode();
        Self {
            browser_id: BrowserId::new(),
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            mode,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            network: NetworkLedger::new(),
            responses,
        }
    }

    pub fn mode(&self) -> AdapterMode {
        self.mode
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", mode = %self.mode.as_str(), "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    pub fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(sid) = &cdp_session {
            self.sessions.insert(sid.clone(), page);
        }
        if let Some(tid) = &target_id {
            self.targets.insert(tid.clone(), page);
        }
        self.registry.insert_page(page, session, target_id, cdp_session);
    }

    pub async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::internal("createTarget missing targetId"))?
            .to_string();

        let deadline = Instant::now() + ATTACH_TIMEOUT;
        loop {
            if let Some(page) = self.targets.get(&target_id).map(|entry| *entry.value()) {
                if self.registry.get(&page).map(|ctx| ctx.is_attached()).unwrap_or(false) {
                    return Ok(page);
                }
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::BrowserUnavailable)
                    .with_hint("timed out waiting for target attach"));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Open a blank tab with lifecycle, runtime and network domains enabled.
    pub async fn open_page(&self) -> Result<PageId, AdapterError> {
        let page = self.create_page("about:blank").await?;
        self.send_page_command(page, "Page.enable", json!({})).await?;
        self.send_page_command(page, "Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        self.send_page_command(page, "Runtime.enable", json!({})).await?;
        self.enable_network(page).await?;
        debug!(target: "cdp-adapter", ?page, "page ready");
        Ok(page)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(ev) => {
                        backoff = MIN_BACKOFF;
                        self.handle_event(ev);
                    }
                    None => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        self.handle_transport_disconnect();
                        warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                        if let Err(err) = self.transport.start().await {
                            warn!(target: "cdp-adapter", %err, "transport restart failed");
                        }
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        sleep(backoff).await;
                        backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                    }
                },
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        let pages = self.registry.pages();
        let had_pages = !pages.is_empty();
        for page in pages {
            self.emit_page_event(page, None, "closed", timestamp_now());
            self.registry.remove_page(&page);
        }
        self.targets.clear();
        self.sessions.clear();
        self.network.clear();

        let message = if had_pages {
            "cdp transport restarted; active pages were reset"
        } else {
            "cdp transport restarted"
        };
        let _ = self.bus.send(RawEvent::Error {
            page: None,
            message: message.to_string(),
        });
    }

    fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(event) {
            let _ = self.bus.send(RawEvent::Error {
                page: None,
                message: format!("cdp event handling error: {err}"),
            });
        }
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params)?,
            "Target.targetDestroyed" => self.on_target_destroyed(event.params)?,
            "Target.attachedToTarget" => self.on_target_attached(event.params)?,
            "Target.detachedFromTarget" => self.on_target_detached(event.params)?,
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params)?,
            "Page.lifecycleEvent" => self.on_page_lifecycle(event)?,
            "Network.requestWillBeSent" => {
                let hop = self.network.on_request(event.params, event.session_id)?;
                self.emit_response(hop);
            }
            "Network.responseReceived" => self.network.on_response(event.params)?,
            "Network.loadingFinished" => {
                let done = self.network.on_finished(event.params)?;
                self.emit_response(done);
            }
            "Network.loadingFailed" => {
                let done = self.network.on_failed(event.params)?;
                self.emit_response(done);
            }
            "Runtime.exceptionThrown" => self.on_exception_thrown(event)?,
            _ => {
                debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
            }
        }
        Ok(())
    }

    fn emit_response(&self, descriptor: Option<ResponseDescriptor>) {
        let Some(descriptor) = descriptor else {
            return;
        };
        debug!(
            target: "cdp-adapter",
            method = %descriptor.method,
            url = %descriptor.url,
            status = descriptor.status,
            "response completed"
        );
        // nobody listening is fine; the pump subscribes before the flow starts
        let _ = self.responses.send(descriptor);
    }

    fn on_target_created(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetCreatedParams = serde_json::from_value(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let target_id = payload.target_info.target_id;
        if self.targets.contains_key(&target_id) {
            return Ok(());
        }
        let page = PageId::new();
        self.targets.insert(target_id.clone(), page);
        self.registry.insert_page(page, SessionId::new(), Some(target_id), None);
        if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page, url);
        }

        let opener = payload
            .target_info
            .opener_id
            .and_then(|opener_id| self.targets.get(&opener_id).map(|entry| *entry.value()));
        self.emit_page_event(page, opener, "opened", timestamp_now());
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetDestroyedParams = serde_json::from_value(params)?;
        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.registry.remove_page(&page);
            self.emit_page_event(page, None, "closed", timestamp_now());
        }
        Ok(())
    }

    fn on_target_attached(&self, params: Value) -> Result<(), AdapterError> {
        let payload: AttachedToTargetParams = serde_json::from_value(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }
        if let Some(page) = self
            .targets
            .get(&payload.target_info.target_id)
            .map(|entry| *entry.value())
        {
            self.sessions.insert(payload.session_id.clone(), page);
            self.registry.set_cdp_session(&page, payload.session_id);
            self.emit_page_event(page, None, "attached", timestamp_now());
        }
        Ok(())
    }

    fn on_target_detached(&self, params: Value) -> Result<(), AdapterError> {
        let payload: DetachedFromTargetParams = serde_json::from_value(params)?;
        self.sessions.remove(&payload.session_id);
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetInfoChangedParams = serde_json::from_value(params)?;
        let Some(page) = self
            .targets
            .get(&payload.target_info.target_id)
            .map(|entry| *entry.value())
        else {
            return Ok(());
        };
        if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
            if self.registry.recent_url(&page).as_deref() != Some(url.as_str()) {
                self.registry.set_recent_url(&page, url.clone());
                let _ = self.bus.send(RawEvent::PageNavigated {
                    page,
                    url,
                    ts: timestamp_now(),
                });
            }
        }
        Ok(())
    }

    fn on_page_lifecycle(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: PageLifecycleParams = serde_json::from_value(event.params)?;
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            let ts = payload
                .timestamp
                .map(|t| (t * 1_000.0) as u64)
                .unwrap_or_else(timestamp_now);
            self.emit_page_event(page, None, &payload.name.to_ascii_lowercase(), ts);
        }
        Ok(())
    }

    fn on_exception_thrown(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: ExceptionThrownParams = serde_json::from_value(event.params)?;
        let message = payload
            .exception_details
            .exception
            .and_then(|ex| ex.description)
            .or(payload.exception_details.text)
            .unwrap_or_else(|| "runtime exception".to_string());
        let page = self.page_from_session(event.session_id.as_ref());
        let _ = self.bus.send(RawEvent::Error { page, message });
        Ok(())
    }

    fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
        session.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
    }

    fn emit_page_event(&self, page: PageId, opener: Option<PageId>, phase: &str, ts: u64) {
        let _ = self.bus.send(RawEvent::PageLifecycle {
            page,
            opener,
            phase: phase.to_string(),
            ts,
        });
    }

    async fn send_to(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        let result = self.transport.send_command(target, method, params).await;
        if let Err(err) = &result {
            debug!(
                target: "cdp-adapter",
                method,
                elapsed_ms = start.elapsed().as_millis() as u64,
                %err,
                "cdp command failed"
            );
        }
        result
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.send_to(CommandTarget::Browser, method, params).await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.cdp_session(&page).ok_or_else(|| {
            AdapterError::internal(format!("missing cdp session for page {page:?}"))
        })?;
        self.send_to(CommandTarget::Session(session), method, params).await
    }

    async fn wait_for_page_ready(&self, page: PageId) -> Result<(), AdapterError> {
        let deadline = Instant::now() + ATTACH_TIMEOUT;
        while Instant::now() < deadline {
            if self.registry.get(&page).map(|ctx| ctx.is_attached()).unwrap_or(false) {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(AdapterError::internal(format!("cdp session not ready for page {page:?}")))
    }

    async fn query_with(
        &self,
        page: PageId,
        spec: &QuerySpec,
        scroll_first: bool,
    ) -> Result<Vec<Anchor>, AdapterError> {
        self.wait_for_page_ready(page).await?;
        let expression = query_expression(spec, scroll_first)?;
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;

        let values = response
            .get("result")
            .and_then(|res| res.get("value"))
            .and_then(|val| val.as_array())
            .ok_or_else(|| AdapterError::internal("query did not return an array value"))?;

        values
            .iter()
            .map(|entry| {
                let x = entry.get("x").and_then(|v| v.as_f64());
                let y = entry.get("y").and_then(|v| v.as_f64());
                match (x, y) {
                    (Some(x), Some(y)) => Ok(Anchor {
                        x,
                        y,
                        disabled: entry.get("disabled").and_then(|v| v.as_bool()).unwrap_or(false),
                    }),
                    _ => Err(AdapterError::internal("query entry missing coordinates")),
                }
            })
            .collect()
    }

    /// One evaluation of a wait gate. Transient evaluation failures count as "not yet".
    async fn probe(&self, page: PageId, gate: &WaitGate) -> Result<bool, AdapterError> {
        let outcome = match gate {
            WaitGate::DomReady => self
                .evaluate_script(page, "document.readyState")
                .await
                .map(|state| matches!(state.as_str(), Some("interactive" | "complete"))),
            WaitGate::Selector(spec) => self.query(page, spec).await.map(|found| !found.is_empty()),
            WaitGate::Enabled(spec) => self
                .query(page, spec)
                .await
                .map(|found| found.first().map(|a| !a.disabled).unwrap_or(false)),
            WaitGate::UrlContains(fragment) => self
                .current_url(page)
                .await
                .map(|url| url.contains(fragment.as_str())),
        };
        match outcome {
            Err(err) if is_transient(&err) => {
                debug!(target: "cdp-adapter", gate = %gate.describe(), %err, "wait probe failed");
                Ok(false)
            }
            other => other,
        }
    }
}

#[async_trait]
impl Cdp for CdpAdapter {
    async fn navigate(&self, page: PageId, url: &str, deadline: Duration) -> Result<(), AdapterError> {
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(reason) = response.get("errorText").and_then(|v| v.as_str()) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("navigation to {url} failed: {reason}")));
        }
        self.registry.set_recent_url(&page, url.to_string());
        self.wait_basic(page, WaitGate::DomReady, deadline).await
    }

    async fn query(&self, page: PageId, spec: &QuerySpec) -> Result<Vec<Anchor>, AdapterError> {
        self.query_with(page, spec, false).await
    }

    async fn click(&self, page: PageId, spec: &QuerySpec, deadline: Duration) -> Result<(), AdapterError> {
        let deadline_at = Instant::now() + deadline;
        let anchor = loop {
            let last = match self.query_with(page, spec, true).await {
                Ok(anchors) => match anchors.into_iter().next() {
                    Some(anchor) if !anchor.disabled => break anchor,
                    Some(_) => "disabled",
                    None => "not found",
                },
                Err(err) if is_transient(&err) => "not resolvable",
                Err(err) => return Err(err),
            };
            if Instant::now() >= deadline_at {
                return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("click target {} {last}", spec.describe())));
            }
            sleep(POLL_INTERVAL).await;
        };

        for kind in ["mousePressed", "mouseReleased"] {
            self.send_page_command(
                page,
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": anchor.x,
                    "y": anchor.y,
                    "button": "left",
                    "buttons": 1,
                    "clickCount": 1,
                    "pointerType": "mouse",
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.wait_for_page_ready(page).await?;
        let focus_expression = format!(
            "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return {{ status: 'not-found' }}; }}\n    el.scrollIntoView({{ block: 'center' }});\n    if (typeof el.focus === 'function') {{ el.focus(); }}\n    if (typeof el.select === 'function') {{ el.select(); }}\n    return {{ status: 'focused' }};\n}})()",
            selector = serde_json::to_string(selector)?,
        );

        let deadline_at = Instant::now() + deadline;
        loop {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({ "expression": focus_expression, "returnByValue": true }),
                )
                .await?;
            let status = response
                .get("result")
                .and_then(|res| res.get("value"))
                .and_then(|val| val.get("status"))
                .and_then(|val| val.as_str())
                .unwrap_or("unknown");

            match status {
                "focused" => break,
                "not-found" | "unknown" if Instant::now() < deadline_at => sleep(POLL_INTERVAL).await,
                _ => {
                    return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                        .with_hint(format!("input '{selector}' not found before deadline")))
                }
            }
        }

        self.send_page_command(page, "Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn evaluate_script(&self, page: PageId, expression: &str) -> Result<Value, AdapterError> {
        self.wait_for_page_ready(page).await?;
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(AdapterError::internal("evaluate_script raised exception")
                .with_data(details.clone()));
        }
        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn wait_basic(&self, page: PageId, gate: WaitGate, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.probe(page, &gate).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let kind = match gate {
                    WaitGate::DomReady => AdapterErrorKind::NavTimeout,
                    _ => AdapterErrorKind::WaitTimeout,
                };
                return Err(AdapterError::new(kind).with_hint(format!(
                    "{} not reached within {}ms",
                    gate.describe(),
                    timeout.as_millis()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn enable_network(&self, page: PageId) -> Result<(), AdapterError> {
        self.send_page_command(
            page,
            "Network.enable",
            json!({
                "maxTotalBufferSize": 10_485_760u64,
                "maxResourceBufferSize": 5_242_880u64,
                "maxPostDataSize": 65_536u64,
            }),
        )
        .await?;
        Ok(())
    }

    async fn current_url(&self, page: PageId) -> Result<String, AdapterError> {
        match self.evaluate_script(page, "location.href").await? {
            Value::String(url) => Ok(url),
            _ => self
                .registry
                .recent_url(&page)
                .ok_or_else(|| AdapterError::internal("page url unavailable")),
        }
    }
}

#[async_trait]
impl BodySource for CdpAdapter {
    async fn read_body(&self, request_id: &str) -> Result<String, CaptureError> {
        let unavailable = |reason: String| CaptureError::BodyUnavailable {
            request_id: request_id.to_string(),
            reason,
        };
        let session = self
            .network
            .take_body_session(request_id)
            .ok_or_else(|| unavailable("response was not observed".to_string()))?;
        let target = session
            .map(CommandTarget::Session)
            .unwrap_or(CommandTarget::Browser);
        let response = self
            .send_to(target, "Network.getResponseBody", json!({ "requestId": request_id }))
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        decode_body(&response).map_err(unavailable)
    }
}

impl NetworkObserver for CdpAdapter {
    fn subscribe_responses(&self) -> ResponseStream {
        self.responses.subscribe()
    }
}

fn decode_body(response: &Value) -> Result<String, String> {
    let body = response
        .get("body")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "getResponseBody returned no body".to_string())?;
    let encoded = response
        .get("base64Encoded")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !encoded {
        return Ok(body.to_string());
    }
    let bytes = STANDARD
        .decode(body)
        .map_err(|err| format!("invalid base64 body: {err}"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_transient(err: &AdapterError) -> bool {
    matches!(err.kind, AdapterErrorKind::CdpIo | AdapterErrorKind::Internal)
}

/// Script resolving a [`QuerySpec`] to the centers of visible matching elements.
fn query_expression(spec: &QuerySpec, scroll_first: bool) -> Result<String, AdapterError> {
    Ok(format!(
        "(() => {{\n    const norm = (value) => (value || '').trim().toLowerCase();\n    let nodes;\n    try {{\n        nodes = Array.from(document.querySelectorAll({selector}));\n    }} catch (err) {{\n        return [];\n    }}\n    const text = {text};\n    if (text !== null) {{\n        const wanted = norm(text);\n        nodes = nodes.filter((el) => {exact} ? norm(el.textContent) === wanted : norm(el.textContent).includes(wanted));\n    }}\n    nodes = nodes.filter((el) => {{\n        const rect = el.getBoundingClientRect();\n        return rect.width > 0 && rect.height > 0;\n    }});\n    const nth = {nth};\n    if (nth !== null) {{\n        const idx = nth < 0 ? nodes.length + nth : nth;\n        nodes = idx >= 0 && idx < nodes.length ? [nodes[idx]] : [];\n    }}\n    return nodes.map((el, i) => {{\n        if ({scroll} && i === 0) {{ el.scrollIntoView({{ block: 'center', inline: 'center' }}); }}\n        const rect = el.getBoundingClientRect();\n        return {{\n            x: rect.left + rect.width / 2,\n            y: rect.top + rect.height / 2,\n            disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true'\n        }};\n    }});\n}})()",
        selector = serde_json::to_string(&spec.selector)?,
        text = serde_json::to_string(&spec.text)?,
        exact = spec.exact,
        nth = serde_json::to_string(&spec.nth)?,
        scroll = scroll_first,
    ))
}

#[derive(Debug, Deserialize)]
struct TargetCreatedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoChangedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    #[serde(rename = "openerId")]
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageLifecycleParams {
    name: String,
    timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExceptionThrownParams {
    #[serde(rename = "exceptionDetails")]
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    text: Option<String>,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct MockTransport {
        started: AtomicBool,
        rx: Mutex<mpsc::Receiver<TransportEvent>>,
        commands: Mutex<Vec<(String, Value)>>,
        responses: Mutex<VecDeque<Value>>,
    }

    impl MockTransport {
        fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    started: AtomicBool::new(false),
                    rx: Mutex::new(rx),
                    commands: Mutex::new(Vec::new()),
                    responses: Mutex::new(VecDeque::new()),
                }),
                tx,
            )
        }

        fn started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        async fn commands(&self) -> Vec<(String, Value)> {
            self.commands.lock().await.clone()
        }

        async fn set_response(&self, value: Value) {
            self.responses.lock().await.push_back(value);
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
        async fn start(&self) -> Result<(), AdapterError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            self.rx.lock().await.recv().await
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            self.commands.lock().await.push((method.to_string(), params));
            Ok(self.responses.lock().await.pop_front().unwrap_or(Value::Null))
        }
    }

    struct DisconnectingTransport {
        start_calls: AtomicUsize,
        next_calls: AtomicUsize,
        rx: Mutex<mpsc::Receiver<TransportEvent>>,
    }

    impl DisconnectingTransport {
        fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    start_calls: AtomicUsize::new(0),
                    next_calls: AtomicUsize::new(0),
                    rx: Mutex::new(rx),
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl CdpTransport for DisconnectingTransport {
        async fn start(&self) -> Result<(), AdapterError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            if self.next_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return None;
            }
            self.rx.lock().await.recv().await
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            _method: &str,
            _params: Value,
        ) -> Result<Value, AdapterError> {
            Ok(Value::Null)
        }
    }

    async fn started_adapter() -> (
        Arc<CdpAdapter>,
        Arc<MockTransport>,
        mpsc::Sender<TransportEvent>,
        broadcast::Receiver<RawEvent>,
    ) {
        let (bus, rx) = crate::event_bus(16);
        let (transport, tx) = MockTransport::new_pair();
        let adapter = Arc::new(CdpAdapter::with_transport(
            CdpConfig::default(),
            bus,
            transport.clone() as Arc<dyn CdpTransport>,
        ));
        Arc::clone(&adapter).start().await.expect("start adapter");
        (adapter, transport, tx, rx)
    }

    fn attached_page(adapter: &CdpAdapter) -> PageId {
        let page = PageId::new();
        adapter.register_page(page, SessionId::new(), Some("target-1".into()), Some("mock-session".into()));
        page
    }

    fn event(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.into(),
            params,
            session_id: Some("mock-session".into()),
        }
    }

    #[tokio::test]
    async fn ignores_unknown_events() {
        let (adapter, transport, tx, mut rx) = started_adapter().await;
        assert!(transport.started());
        assert_eq!(adapter.mode(), AdapterMode::Real);

        tx.send(event("Test.Event", Value::Null)).await.expect("send");
        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "unexpected raw event broadcast: {result:?}");

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn navigate_routes_through_transport() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        transport.set_response(json!({ "frameId": "f1" })).await;
        transport
            .set_response(json!({ "result": { "value": "complete" } }))
            .await;

        adapter
            .navigate(page, "https://devenvizom.oizom.com/#/login", Duration::from_secs(5))
            .await
            .expect("navigate through transport");

        let commands = transport.commands().await;
        assert_eq!(commands[0].0, "Page.navigate");
        assert_eq!(commands[1].0, "Runtime.evaluate");
        assert_eq!(
            adapter.registry.recent_url(&page).as_deref(),
            Some("https://devenvizom.oizom.com/#/login")
        );

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn navigation_error_text_fails_navigate() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);
        transport
            .set_response(json!({ "frameId": "f1", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
            .await;

        let err = adapter
            .navigate(page, "https://nowhere.invalid", Duration::from_secs(1))
            .await
            .expect_err("navigation error");
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.hint.unwrap_or_default().contains("ERR_NAME_NOT_RESOLVED"));

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn event_loop_recovers_after_transport_disconnect() {
        let (bus, mut rx) = crate::event_bus(8);
        let (transport, _tx) = DisconnectingTransport::new_pair();
        let adapter = Arc::new(CdpAdapter::with_transport(
            CdpConfig::default(),
            bus,
            transport.clone() as Arc<dyn CdpTransport>,
        ));
        Arc::clone(&adapter).start().await.expect("start adapter");

        let message = loop {
            let raw = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("event before timeout")
                .expect("bus open");
            if let RawEvent::Error { message, .. } = raw {
                break message;
            }
        };
        assert!(message.contains("restarted"));
        sleep(Duration::from_millis(50)).await;
        assert!(transport.start_calls.load(Ordering::SeqCst) >= 2);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn network_events_emit_response_descriptor() {
        let (adapter, transport, tx, _rx) = started_adapter().await;
        let _page = attached_page(&adapter);
        let mut responses = adapter.subscribe_responses();

        tx.send(event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r1",
                "request": { "url": "https://envdevapi.oizom.com/users/login", "method": "POST" }
            }),
        ))
        .await
        .expect("send request");
        tx.send(event(
            "Network.responseReceived",
            json!({
                "requestId": "r1",
                "response": {
                    "status": 200,
                    "url": "https://envdevapi.oizom.com/users/login",
                    "mimeType": "application/json",
                    "headers": { "content-type": "application/json; charset=utf-8" }
                }
            }),
        ))
        .await
        .expect("send response");
        tx.send(event("Network.loadingFinished", json!({ "requestId": "r1" })))
            .await
            .expect("send finished");

        let descriptor = timeout(Duration::from_secs(1), responses.recv())
            .await
            .expect("descriptor before timeout")
            .expect("stream open");
        assert_eq!(descriptor.request_id, "r1");
        assert_eq!(descriptor.method, "POST");
        assert_eq!(descriptor.status, 200);
        assert_eq!(
            descriptor.content_type.as_deref(),
            Some("application/json; charset=utf-8")
        );

        transport
            .set_response(json!({ "body": STANDARD.encode(r#"{"token":"abc"}"#), "base64Encoded": true }))
            .await;
        let body = adapter.read_body("r1").await.expect("body");
        assert_eq!(body, r#"{"token":"abc"}"#);
        let commands = transport.commands().await;
        let (method, params) = commands.last().expect("body command");
        assert_eq!(method, "Network.getResponseBody");
        assert_eq!(params["requestId"], "r1");

        let again = adapter.read_body("r1").await.expect_err("body is read once");
        assert!(matches!(again, CaptureError::BodyUnavailable { .. }));

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn body_of_unobserved_response_is_unavailable() {
        let (adapter, _transport, _tx, _rx) = started_adapter().await;
        let err = adapter.read_body("missing").await.expect_err("unknown id");
        assert!(matches!(err, CaptureError::BodyUnavailable { ref request_id, .. } if request_id == "missing"));
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn lifecycle_events_are_forwarded_to_bus() {
        let (adapter, _transport, tx, mut rx) = started_adapter().await;
        let page = attached_page(&adapter);

        tx.send(event(
            "Page.lifecycleEvent",
            json!({ "name": "DOMContentLoaded", "frameId": "f1", "timestamp": 12.5 }),
        ))
        .await
        .expect("send lifecycle");

        let raw = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event before timeout")
            .expect("bus open");
        match raw {
            RawEvent::PageLifecycle { page: got, phase, ts, .. } => {
                assert_eq!(got, page);
                assert_eq!(phase, "domcontentloaded");
                assert_eq!(ts, 12_500);
            }
            other => panic!("unexpected event {other:?}"),
        }

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn click_dispatches_mouse_events() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        transport
            .set_response(json!({
                "result": { "value": [ { "x": 42.0, "y": 24.0, "disabled": false } ] }
            }))
            .await;

        let spec = QuerySpec::css("button").with_text("LOG IN").exact();
        adapter
            .click(page, &spec, Duration::from_secs(2))
            .await
            .expect("click dispatch succeeds");

        let commands = transport.commands().await;
        let expression = commands[0].1["expression"].as_str().expect("expression");
        assert!(expression.contains("\"LOG IN\""));

        let mouse: Vec<&Value> = commands
            .iter()
            .filter(|(method, _)| method == "Input.dispatchMouseEvent")
            .map(|(_, params)| params)
            .collect();
        assert_eq!(mouse.len(), 2);
        assert_eq!(mouse[0]["type"], "mousePressed");
        assert_eq!(mouse[0]["x"].as_f64(), Some(42.0));
        assert_eq!(mouse[1]["type"], "mouseReleased");

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn click_waits_for_element_to_become_enabled() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        transport
            .set_response(json!({ "result": { "value": [ { "x": 1.0, "y": 1.0, "disabled": true } ] } }))
            .await;
        transport
            .set_response(json!({ "result": { "value": [ { "x": 5.0, "y": 6.0, "disabled": false } ] } }))
            .await;

        adapter
            .click(page, &QuerySpec::css("button"), Duration::from_secs(2))
            .await
            .expect("click after enable");

        let commands = transport.commands().await;
        let evaluations = commands.iter().filter(|(m, _)| m == "Runtime.evaluate").count();
        assert_eq!(evaluations, 2);
        let pressed = commands
            .iter()
            .find(|(m, _)| m == "Input.dispatchMouseEvent")
            .map(|(_, p)| p)
            .expect("mouse event");
        assert_eq!(pressed["x"].as_f64(), Some(5.0));

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn click_without_match_reports_target_not_found() {
        let (adapter, _transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        let err = adapter
            .click(page, &QuerySpec::css("mat-option").nth(0), Duration::from_millis(250))
            .await
            .expect_err("nothing to click");
        assert_eq!(err.kind, AdapterErrorKind::TargetNotFound);
        assert!(err.hint.unwrap_or_default().contains("mat-option #0"));

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn type_text_focuses_then_inserts() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        transport
            .set_response(json!({ "result": { "value": { "status": "focused" } } }))
            .await;
        adapter
            .type_text(page, "input[name=email]", "ops@example.com", Duration::from_secs(1))
            .await
            .expect("type text");

        let commands = transport.commands().await;
        assert_eq!(commands.len(), 2);
        assert!(commands[0].1["expression"]
            .as_str()
            .unwrap_or_default()
            .contains("el.select()"));
        assert_eq!(commands[1].0, "Input.insertText");
        assert_eq!(commands[1].1["text"], "ops@example.com");

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn wait_for_url_polls_location() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        transport
            .set_response(json!({ "result": { "value": "https://devenvizom.oizom.com/#/login" } }))
            .await;
        transport
            .set_response(json!({ "result": { "value": "https://devenvizom.oizom.com/#/overview/map" } }))
            .await;

        adapter
            .wait_basic(page, WaitGate::UrlContains("overview/map".into()), Duration::from_secs(2))
            .await
            .expect("url reached");
        assert_eq!(transport.commands().await.len(), 2);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn dom_ready_timeout_is_nav_timeout() {
        let (adapter, transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);
        transport
            .set_response(json!({ "result": { "value": "loading" } }))
            .await;

        let err = adapter
            .wait_basic(page, WaitGate::DomReady, Duration::from_millis(250))
            .await
            .expect_err("never ready");
        assert_eq!(err.kind, AdapterErrorKind::NavTimeout);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn selector_wait_times_out_with_wait_timeout() {
        let (adapter, _transport, _tx, _rx) = started_adapter().await;
        let page = attached_page(&adapter);

        let err = adapter
            .wait_basic(
                page,
                WaitGate::Selector(QuerySpec::css(".clock-face__number span")),
                Duration::from_millis(250),
            )
            .await
            .expect_err("selector never appears");
        assert_eq!(err.kind, AdapterErrorKind::WaitTimeout);

        adapter.shutdown().await;
    }

    #[test]
    fn query_expression_embeds_literals() {
        let spec = QuerySpec::css(".mat-calendar-body-cell-content").nth(-1);
        let script = query_expression(&spec, false).expect("script");
        assert!(script.contains("\".mat-calendar-body-cell-content\""));
        assert!(script.contains("const nth = -1;"));
        assert!(script.contains("const text = null;"));
    }

    #[test]
    fn decodes_plain_and_base64_bodies() {
        assert_eq!(
            decode_body(&json!({ "body": "plain", "base64Encoded": false })).as_deref(),
            Ok("plain")
        );
        assert_eq!(
            decode_body(&json!({ "body": STANDARD.encode("hi"), "base64Encoded": true })).as_deref(),
            Ok("hi")
        );
        assert!(decode_body(&json!({})).is_err());
    }
}
