//! The one CDP session and its lifecycle.
//!
//! Nothing connects at startup: the first tool call that needs the browser
//! walks the liveness cascade in `ensure_connected`. A disconnect only flags
//! the session — the next call tears down and reconnects. The session slot's
//! async mutex serializes concurrent connect attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, Viewport,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::cdp::browser_protocol::network::RequestId;
use chromiumoxide::cdp::browser_protocol::{dom, log as cdp_log, network, page as cdp_page};
use chromiumoxide::cdp::js_protocol::runtime;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::browser::events::{TelemetryBuffers, SWEEP_INTERVAL};
use crate::browser::launch;
use crate::browser::targets::{
    self, choose_by_pattern, choose_default_target, BrowserEndpoint, PageTarget,
};
use crate::config::Config;
use crate::error::{BridgeError, Result};

/// A session younger than this is trusted without a liveness probe.
const LIVENESS_WINDOW: Duration = Duration::from_secs(30);
/// Budget for the cheap liveness probe itself.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Page-script evaluation budget.
pub const EVAL_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Target polling interval ceiling for `connect_to_page` waits.
const TARGET_POLL: Duration = Duration::from_millis(300);

/// Best-effort hook invoked with the connected page. Errors are the hook's
/// own problem; the session manager logs and moves on.
pub type PageHook = Arc<dyn Fn(Page) -> BoxFuture<'static, ()> + Send + Sync>;

/// The most recent explicit target choice; re-applied on every reconnect
/// until replaced.
#[derive(Debug, Clone, Default)]
pub enum TargetQuery {
    #[default]
    Default,
    Id(String),
    Pattern(String),
}

struct ActiveSession {
    browser: Browser,
    page: Page,
    target: PageTarget,
    tasks: Vec<JoinHandle<()>>,
    disconnected: Arc<AtomicBool>,
    last_ok: Instant,
}

impl ActiveSession {
    fn teardown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Dropping a connected (not launched) Browser closes the WebSocket
        // and leaves the browser itself running.
        drop(self.browser);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_title: Option<String>,
    pub console_buffered: usize,
    pub network_buffered: usize,
    pub pending_requests: usize,
    pub auto_launch: bool,
}

pub struct SessionManager {
    config: Config,
    client: reqwest::Client,
    buffers: Arc<TelemetryBuffers>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    query: std::sync::Mutex<TargetQuery>,
    on_connect: std::sync::Mutex<Option<PageHook>>,
    on_navigate: std::sync::Mutex<Option<PageHook>>,
    pid_swept: AtomicBool,
}

impl SessionManager {
    pub fn new(config: Config) -> Arc<Self> {
        let buffers = Arc::new(TelemetryBuffers::new(
            config.console_buffer,
            config.network_buffer,
        ));
        Arc::new(Self {
            config,
            client: reqwest::Client::new(),
            buffers,
            session: tokio::sync::Mutex::new(None),
            query: std::sync::Mutex::new(TargetQuery::Default),
            on_connect: std::sync::Mutex::new(None),
            on_navigate: std::sync::Mutex::new(None),
            pid_swept: AtomicBool::new(false),
        })
    }

    pub fn buffers(&self) -> &Arc<TelemetryBuffers> {
        &self.buffers
    }

    pub fn set_on_connect(&self, hook: PageHook) {
        *self.on_connect.lock().unwrap() = Some(hook);
    }

    pub fn set_on_navigate(&self, hook: PageHook) {
        *self.on_navigate.lock().unwrap() = Some(hook);
    }

    /// Passive: answers from the slot without touching the browser.
    pub async fn is_connected(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(s) => !s.disconnected.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// Liveness cascade: trust a fresh session, probe a stale one, rebuild
    /// on any doubt. Returns a page handle for the caller's operation.
    pub async fn ensure_connected(&self) -> Result<Page> {
        let mut slot = self.session.lock().await;

        if let Some(existing) = slot.as_mut() {
            if existing.disconnected.load(Ordering::SeqCst) {
                tracing::info!("Session flagged disconnected, rebuilding");
                if let Some(dead) = slot.take() {
                    dead.teardown();
                }
            } else if existing.last_ok.elapsed() < LIVENESS_WINDOW {
                return Ok(existing.page.clone());
            } else {
                let probe = tokio::time::timeout(
                    PROBE_TIMEOUT,
                    existing.page.evaluate("1".to_string()),
                )
                .await;
                match probe {
                    Ok(Ok(_)) => {
                        existing.last_ok = Instant::now();
                        return Ok(existing.page.clone());
                    }
                    _ => {
                        tracing::info!("Liveness probe failed, rebuilding session");
                        if let Some(dead) = slot.take() {
                            dead.teardown();
                        }
                    }
                }
            }
        }

        let session = self.connect_with_retries().await?;
        let page = session.page.clone();
        *slot = Some(session);
        drop(slot);

        let hook = self.on_connect.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(page.clone()).await;
        }
        Ok(page)
    }

    async fn connect_with_retries(&self) -> Result<ActiveSession> {
        if !self.pid_swept.swap(true, Ordering::SeqCst) {
            launch::sweep_stale_pid_file(self.config.debug_port).await;
        }

        let mut last_err: Option<BridgeError> = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                let backoff =
                    BACKOFF_CAP.min(BACKOFF_BASE * 2u32.saturating_pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
            match self.connect_once().await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            BridgeError::BrowserUnreachable("connect failed".to_string())
        }))
    }

    /// One full connect: resolve the ws endpoint (launching on demand when
    /// allowed), pick a target, attach, enable domains, wire events.
    async fn connect_once(&self) -> Result<ActiveSession> {
        let endpoint = match self.resolve_endpoint().await {
            Ok(ep) => ep,
            Err(e) => {
                if self.config.ws_url.is_some() {
                    // Direct override: never launch, fail as-is.
                    return Err(e);
                }
                if !self.config.auto_launch {
                    return Err(BridgeError::BrowserUnreachable(format!(
                        "{e}. Auto-launch is disabled (PAGELENS_AUTO_LAUNCH=false); \
                         start a browser with --remote-debugging-port={} or enable auto-launch.",
                        self.config.debug_port
                    )));
                }
                let pid = launch::launch(&self.config, &self.client).await?;
                launch::write_pid_file(self.config.debug_port, pid);
                self.resolve_endpoint().await?
            }
        };

        let (mut browser, mut handler) = Browser::connect(endpoint.ws_url.clone())
            .await
            .map_err(|e| {
                BridgeError::BrowserUnreachable(format!(
                    "WebSocket connect to {} failed: {e}",
                    endpoint.ws_url
                ))
            })?;

        let disconnected = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        let handler_flag = disconnected.clone();
        let handler_buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "CDP handler error");
                }
            }
            // Stream end means the transport is gone. No auto-reconnect;
            // the next tool call rebuilds.
            handler_flag.store(true, Ordering::SeqCst);
            handler_buffers.clear_pending();
            tracing::info!("CDP connection closed");
        }));

        let page_targets = self.list_targets_via(&mut browser).await?;
        let query = self.query.lock().unwrap().clone();
        let target = select_target(&page_targets, &query)
            .ok_or_else(|| target_not_found(&query))?
            .clone();

        let page = attach_to_target(&mut browser, &target.id).await?;

        let (runtime_en, network_en, dom_en, page_en, log_en) = tokio::join!(
            page.execute(runtime::EnableParams::default()),
            page.execute(network::EnableParams::default()),
            page.execute(dom::EnableParams::default()),
            page.execute(cdp_page::EnableParams::default()),
            page.execute(cdp_log::EnableParams::default()),
        );
        runtime_en?;
        network_en?;
        dom_en?;
        page_en?;
        log_en?;

        self.attach_event_pipelines(&page, &disconnected, &mut tasks)
            .await?;

        tracing::info!(
            browser = %endpoint.browser,
            target = %target.url,
            "Connected to page target"
        );

        Ok(ActiveSession {
            browser,
            page,
            target,
            tasks,
            disconnected,
            last_ok: Instant::now(),
        })
    }

    /// The ws endpoint comes from the override or from `/json/version` on
    /// every connect — a restarted browser invalidates old ws URLs.
    async fn resolve_endpoint(&self) -> Result<BrowserEndpoint> {
        if let Some(ws) = &self.config.ws_url {
            return Ok(BrowserEndpoint {
                browser: String::new(),
                ws_url: ws.clone(),
            });
        }
        targets::fetch_endpoint(&self.client, &self.config.inspection_base()).await
    }

    /// Page targets over the HTTP inspection endpoint, or over CDP when a
    /// direct ws override leaves us without one.
    async fn list_targets_via(&self, browser: &mut Browser) -> Result<Vec<PageTarget>> {
        if self.config.ws_url.is_none() {
            return targets::fetch_targets(&self.client, &self.config.inspection_base()).await;
        }
        let infos = browser
            .fetch_targets()
            .await
            .map_err(|e| BridgeError::Cdp(format!("Target.getTargets failed: {e}")))?;
        Ok(cdp_targets_to_pages(infos))
    }

    /// Public target listing for tools; connects only when a direct ws
    /// override makes CDP the only listing channel.
    pub async fn list_targets(&self) -> Result<Vec<PageTarget>> {
        if self.config.ws_url.is_none() {
            return targets::fetch_targets(&self.client, &self.config.inspection_base()).await;
        }
        self.ensure_connected().await?;
        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| BridgeError::SessionLost("no session".to_string()))?;
        let infos = session
            .browser
            .fetch_targets()
            .await
            .map_err(|e| BridgeError::Cdp(format!("Target.getTargets failed: {e}")))?;
        Ok(cdp_targets_to_pages(infos))
    }

    async fn attach_event_pipelines(
        &self,
        page: &Page,
        disconnected: &Arc<AtomicBool>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        use crate::browser::events::render_console_args;

        let mut console_events = page
            .event_listener::<runtime::EventConsoleApiCalled>()
            .await?;
        let buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                let level = format!("{:?}", event.r#type).to_lowercase();
                let message = render_console_args(&event.args);
                buffers.push_console(level, message);
            }
        }));

        let mut log_events = page.event_listener::<cdp_log::EventEntryAdded>().await?;
        let buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = log_events.next().await {
                let level = format!("{:?}", event.entry.level).to_lowercase();
                buffers.push_browser_log(level, &event.entry.text);
            }
        }));

        let mut request_events = page
            .event_listener::<network::EventRequestWillBeSent>()
            .await?;
        let buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                buffers.on_request_will_be_sent(
                    event.request_id.inner(),
                    &event.request.url,
                    &event.request.method,
                    *event.timestamp.inner(),
                );
            }
        }));

        let mut response_events = page
            .event_listener::<network::EventResponseReceived>()
            .await?;
        let buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = response_events.next().await {
                buffers.on_response_received(
                    event.request_id.inner(),
                    event.response.status,
                    *event.timestamp.inner(),
                );
            }
        }));

        let mut failure_events = page
            .event_listener::<network::EventLoadingFailed>()
            .await?;
        let buffers = self.buffers.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = failure_events.next().await {
                buffers.on_loading_failed(
                    event.request_id.inner(),
                    &event.error_text,
                    *event.timestamp.inner(),
                );
            }
        }));

        let mut load_events = page
            .event_listener::<cdp_page::EventLoadEventFired>()
            .await?;
        let navigate_hook = self.on_navigate.lock().unwrap().clone();
        let hook_page = page.clone();
        tasks.push(tokio::spawn(async move {
            while load_events.next().await.is_some() {
                if let Some(hook) = &navigate_hook {
                    hook(hook_page.clone()).await;
                }
            }
        }));

        let buffers = self.buffers.clone();
        let sweep_flag = disconnected.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                if sweep_flag.load(Ordering::SeqCst) {
                    break;
                }
                buffers.sweep_stale_pending();
            }
        }));

        Ok(())
    }

    /// Select a page by exact target id or URL pattern, optionally waiting
    /// for it to appear. The choice becomes the sticky preference for later
    /// reconnects.
    pub async fn connect_to_page(
        &self,
        query: TargetQuery,
        wait_ms: Option<u64>,
    ) -> Result<PageTarget> {
        let deadline = wait_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let poll = Duration::from_millis(
            wait_ms
                .unwrap_or(0)
                .min(TARGET_POLL.as_millis() as u64)
                .max(1),
        );

        let target = loop {
            let listed = self.list_targets().await?;
            if let Some(t) = select_target(&listed, &query) {
                break t.clone();
            }
            match deadline {
                Some(d) if Instant::now() < d => tokio::time::sleep(poll).await,
                _ => return Err(target_not_found(&query)),
            }
        };

        *self.query.lock().unwrap() = query;

        // Reconnect so the session is attached to the chosen target.
        let mut slot = self.session.lock().await;
        if let Some(old) = slot.take() {
            old.teardown();
        }
        drop(slot);
        self.ensure_connected().await?;

        let slot = self.session.lock().await;
        Ok(slot
            .as_ref()
            .map(|s| s.target.clone())
            .unwrap_or(target))
    }

    pub async fn status(&self) -> SessionStatus {
        let (connected, target) = {
            let slot = self.session.lock().await;
            match slot.as_ref() {
                Some(s) if !s.disconnected.load(Ordering::SeqCst) => {
                    (true, Some(s.target.clone()))
                }
                _ => (false, None),
            }
        };
        let browser = if self.config.ws_url.is_none() {
            targets::fetch_endpoint(&self.client, &self.config.inspection_base())
                .await
                .ok()
                .map(|ep| ep.browser)
        } else {
            None
        };
        SessionStatus {
            connected,
            browser,
            target_url: target.as_ref().map(|t| t.url.clone()),
            target_title: target.as_ref().map(|t| t.title.clone()),
            console_buffered: self.buffers.console_len(),
            network_buffered: self.buffers.network_len(),
            pending_requests: self.buffers.pending_len(),
            auto_launch: self.config.auto_launch,
        }
    }

    // ── Page operations used by the tool surface ───────────────────────

    /// Evaluate with the standard budget. A throwing script is an
    /// `Evaluation` error carrying the exception text, not a session fault.
    pub async fn evaluate(&self, expression: &str) -> Result<Option<serde_json::Value>> {
        let page = self.ensure_connected().await?;
        let result = tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression.to_string()))
            .await
            .map_err(|_| {
                BridgeError::Evaluation(format!(
                    "Evaluation timed out after {EVAL_TIMEOUT:?}"
                ))
            })?
            .map_err(|e| BridgeError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned())
    }

    /// Fire-and-forget evaluation for overlay pushes: skipped silently when
    /// nothing is connected, errors only logged.
    pub async fn evaluate_if_connected(&self, expression: &str) {
        let page = {
            let slot = self.session.lock().await;
            match slot.as_ref() {
                Some(s) if !s.disconnected.load(Ordering::SeqCst) => s.page.clone(),
                _ => return,
            }
        };
        if let Err(e) =
            tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression.to_string())).await
        {
            tracing::debug!(error = %e, "Best-effort evaluation timed out");
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.ensure_connected().await?;
        tokio::time::timeout(EVAL_TIMEOUT, page.goto(url.to_string()))
            .await
            .map_err(|_| BridgeError::Cdp(format!("Navigation to {url} timed out")))?
            .map_err(|e| BridgeError::Cdp(format!("Navigation failed: {e}")))?;
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        let page = self.ensure_connected().await?;
        tokio::time::timeout(EVAL_TIMEOUT, page.reload())
            .await
            .map_err(|_| BridgeError::Cdp("Reload timed out".to_string()))?
            .map_err(|e| BridgeError::Cdp(format!("Reload failed: {e}")))?;
        Ok(())
    }

    /// querySelectorAll through the DOM domain; outer HTML per node.
    pub async fn query_dom(&self, selector: &str, limit: usize) -> Result<Vec<String>> {
        let page = self.ensure_connected().await?;
        let doc = page
            .execute(dom::GetDocumentParams::default())
            .await
            .map_err(|e| BridgeError::Cdp(format!("DOM.getDocument failed: {e}")))?;
        let root_id = doc.root.node_id;
        let found = page
            .execute(dom::QuerySelectorAllParams::new(
                root_id,
                selector.to_string(),
            ))
            .await
            .map_err(|e| BridgeError::Cdp(format!("querySelectorAll({selector}) failed: {e}")))?;

        let mut nodes = Vec::new();
        for node_id in found.node_ids.iter().take(limit) {
            let html = page
                .execute(dom::GetOuterHtmlParams::builder().node_id(*node_id).build())
                .await
                .map(|r| r.outer_html.clone())
                .unwrap_or_else(|e| format!("<!-- outerHTML unavailable: {e} -->"));
            nodes.push(html);
        }
        Ok(nodes)
    }

    pub async fn screenshot_viewport(&self) -> Result<Vec<u8>> {
        let page = self.ensure_connected().await?;
        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build(),
        )
        .await
        .map_err(|e| BridgeError::Cdp(format!("Screenshot failed: {e}")))
    }

    /// Clipped capture used for annotation thumbnails.
    pub async fn screenshot_clip(&self, x: f64, y: f64, width: f64, height: f64) -> Result<Vec<u8>> {
        let page = self.ensure_connected().await?;
        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .clip(Viewport {
                    x,
                    y,
                    width,
                    height,
                    scale: 1.0,
                })
                .build(),
        )
        .await
        .map_err(|e| BridgeError::Cdp(format!("Clipped screenshot failed: {e}")))
    }

    pub async fn response_body(&self, request_id: &str) -> Result<(String, bool)> {
        let page = self.ensure_connected().await?;
        let resp = page
            .execute(network::GetResponseBodyParams::new(RequestId::from(
                request_id.to_string(),
            )))
            .await
            .map_err(|e| {
                BridgeError::NotFound(format!("response body for {request_id}: {e}"))
            })?;
        Ok((resp.body.clone(), resp.base64_encoded))
    }

    pub async fn request_post_data(&self, request_id: &str) -> Result<String> {
        let page = self.ensure_connected().await?;
        let resp = page
            .execute(network::GetRequestPostDataParams::new(RequestId::from(
                request_id.to_string(),
            )))
            .await
            .map_err(|e| {
                BridgeError::NotFound(format!("post data for {request_id}: {e}"))
            })?;
        Ok(resp.post_data.clone())
    }

    /// Close the CDP session. The browser itself keeps running; the next
    /// instance reattaches through discovery.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            tracing::info!("Closing browser session");
            session.teardown();
        }
    }
}

fn cdp_targets_to_pages(
    infos: Vec<chromiumoxide::cdp::browser_protocol::target::TargetInfo>,
) -> Vec<PageTarget> {
    infos
        .into_iter()
        .filter(|t| t.r#type == "page")
        .map(|t| PageTarget {
            id: t.target_id.inner().clone(),
            title: t.title,
            kind: t.r#type,
            url: t.url,
        })
        .collect()
}

fn select_target<'t>(listed: &'t [PageTarget], query: &TargetQuery) -> Option<&'t PageTarget> {
    match query {
        TargetQuery::Default => choose_default_target(listed),
        TargetQuery::Id(id) => listed.iter().find(|t| t.id == *id),
        TargetQuery::Pattern(pattern) => choose_by_pattern(listed, pattern),
    }
}

fn target_not_found(query: &TargetQuery) -> BridgeError {
    match query {
        TargetQuery::Default => {
            BridgeError::TargetNotFound("no page targets available".to_string())
        }
        TargetQuery::Id(id) => BridgeError::TargetNotFound(format!("no target with id {id}")),
        TargetQuery::Pattern(p) => {
            BridgeError::TargetNotFound(format!("no target matching {p:?}"))
        }
    }
}

/// Attaching right after discovery can race the browser; retry briefly.
async fn attach_to_target(browser: &mut Browser, target_id: &str) -> Result<Page> {
    let id = TargetId::from(target_id.to_string());
    let mut last_err = None;
    for attempt in 1..=5u64 {
        match browser.get_page(id.clone()).await {
            Ok(page) => return Ok(page),
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(100 * attempt)).await;
    }
    Err(BridgeError::TargetNotFound(format!(
        "could not attach to target {target_id}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, url: &str) -> PageTarget {
        PageTarget {
            id: id.to_string(),
            title: String::new(),
            kind: "page".to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn select_by_id_is_exact() {
        let listed = vec![target("abc", "http://localhost/"), target("abd", "http://x/")];
        let query = TargetQuery::Id("abd".to_string());
        assert_eq!(select_target(&listed, &query).unwrap().id, "abd");
        assert!(select_target(&listed, &TargetQuery::Id("ab".to_string())).is_none());
    }

    #[test]
    fn select_default_prefers_loopback() {
        let listed = vec![
            target("a", "devtools://devtools/x"),
            target("b", "https://example.com/"),
            target("c", "http://127.0.0.1:8080/"),
        ];
        assert_eq!(
            select_target(&listed, &TargetQuery::Default).unwrap().id,
            "c"
        );
    }

    #[test]
    fn backoff_schedule_is_capped() {
        let delays: Vec<Duration> = (1..CONNECT_ATTEMPTS)
            .map(|attempt| BACKOFF_CAP.min(BACKOFF_BASE * 2u32.saturating_pow(attempt - 1)))
            .collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(500), Duration::from_secs(1)]
        );
        assert!(BACKOFF_CAP.min(BACKOFF_BASE * 2u32.pow(10)) == BACKOFF_CAP);
    }

    #[tokio::test]
    async fn manager_starts_disconnected() {
        let manager = SessionManager::new(Config::default());
        assert!(!manager.is_connected().await);
        let status = manager.status().await;
        assert!(!status.connected);
        assert_eq!(status.console_buffered, 0);
    }
}
