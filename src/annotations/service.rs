//! Loopback HTTP service consumed by the injected overlay.
//!
//! Binds the configured base port or one of the next three, loopback only.
//! The CORS policy is origin-echoing: loopback http(s) origins are echoed
//! back, requests without an Origin header get a neutral loopback origin,
//! anything else gets no allow-origin header at all.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::annotations::send::SendRendezvous;
use crate::annotations::types::{
    validate_text, Annotation, AnnotationStatus, CreateAnnotationBody, PatchAnnotationBody,
    Rect, MAX_ANNOTATIONS,
};
use crate::browser::targets::{is_loopback_host, url_host};
use crate::error::{BridgeError, Result};

/// Request bodies larger than this are refused outright.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
/// Ports probed: base, base+1, base+2, base+3.
const PORT_ATTEMPTS: u16 = 4;
/// Allow-origin value when the request carries no Origin header.
const NEUTRAL_ORIGIN: &str = "http://localhost";

/// Captures a clipped screenshot for a freshly created annotation,
/// returning a data URL. Wired to the session manager.
pub type ScreenshotHook =
    Arc<dyn Fn(Rect) -> BoxFuture<'static, Result<String>> + Send + Sync>;
/// Invoked with the open-annotation count every time the user hits Send.
pub type SendNotifyHook = Arc<dyn Fn(usize) + Send + Sync>;

// ── store ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct AnnotationStore {
    items: StdMutex<Vec<Annotation>>,
}

impl AnnotationStore {
    fn snapshot(&self) -> Vec<Annotation> {
        self.items.lock().unwrap().clone()
    }

    fn open(&self) -> Vec<Annotation> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.status == AnnotationStatus::Open)
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn get(&self, id: &str) -> Option<Annotation> {
        self.items.lock().unwrap().iter().find(|a| a.id == id).cloned()
    }

    /// Cap check and insert under one lock: the cap can never be raced past.
    fn insert(&self, annotation: Annotation) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        if items.len() >= MAX_ANNOTATIONS {
            return Err(BridgeError::QuotaExceeded(MAX_ANNOTATIONS));
        }
        items.push(annotation);
        Ok(())
    }

    fn update_text(&self, id: &str, text: String) -> Result<Annotation> {
        let mut items = self.items.lock().unwrap();
        let ann = items
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| BridgeError::NotFound(format!("annotation {id}")))?;
        ann.text = text;
        ann.updated_at = crate::annotations::types::iso_now();
        Ok(ann.clone())
    }

    fn resolve(&self, id: &str) -> Result<Annotation> {
        let mut items = self.items.lock().unwrap();
        let ann = items
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| BridgeError::NotFound(format!("annotation {id}")))?;
        if ann.status == AnnotationStatus::Open {
            ann.status = AnnotationStatus::Resolved;
            ann.updated_at = crate::annotations::types::iso_now();
        }
        Ok(ann.clone())
    }

    fn delete(&self, id: &str) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|a| a.id != id);
        items.len() != before
    }

    fn clear(&self) -> usize {
        let mut items = self.items.lock().unwrap();
        let deleted = items.len();
        items.clear();
        deleted
    }
}

// ── service ────────────────────────────────────────────────────────────

struct Started {
    port: u16,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct AnnotationService {
    base_port: u16,
    store: AnnotationStore,
    rendezvous: SendRendezvous,
    screenshot_hook: StdMutex<Option<ScreenshotHook>>,
    send_notify: StdMutex<Option<SendNotifyHook>>,
    started: tokio::sync::Mutex<Option<Started>>,
}

impl AnnotationService {
    pub fn new(base_port: u16) -> Arc<Self> {
        Arc::new(Self {
            base_port,
            store: AnnotationStore::default(),
            rendezvous: SendRendezvous::default(),
            screenshot_hook: StdMutex::new(None),
            send_notify: StdMutex::new(None),
            started: tokio::sync::Mutex::new(None),
        })
    }

    pub fn set_screenshot_hook(&self, hook: ScreenshotHook) {
        *self.screenshot_hook.lock().unwrap() = Some(hook);
    }

    pub fn set_send_notify_hook(&self, hook: SendNotifyHook) {
        *self.send_notify.lock().unwrap() = Some(hook);
    }

    /// Start serving; idempotent. Returns the bound port.
    pub async fn start(self: &Arc<Self>) -> Result<u16> {
        let mut started = self.started.lock().await;
        if let Some(s) = started.as_ref() {
            return Ok(s.port);
        }

        let (listener, port) = self.bind().await?;
        let app = router(self.clone());
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let task = tokio::spawn(async move {
            let shutdown = async move { child.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "Annotation service failed");
            }
        });

        tracing::info!(port, "Annotation service listening on 127.0.0.1");
        *started = Some(Started { port, cancel, task });
        Ok(port)
    }

    async fn bind(&self) -> Result<(tokio::net::TcpListener, u16)> {
        let mut last_err = None;
        for offset in 0..PORT_ATTEMPTS {
            let port = self.base_port + offset;
            match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(BridgeError::Config(format!(
            "No free annotation port in {}..={}: {}",
            self.base_port,
            self.base_port + PORT_ATTEMPTS - 1,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub async fn port(&self) -> Option<u16> {
        self.started.lock().await.as_ref().map(|s| s.port)
    }

    pub async fn shutdown(&self) {
        let mut started = self.started.lock().await;
        if let Some(s) = started.take() {
            s.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(2), s.task).await;
            tracing::info!("Annotation service stopped");
        }
    }

    // Store accessors used by the tool surface.

    pub fn annotations(&self) -> Vec<Annotation> {
        self.store.snapshot()
    }

    pub fn open_annotations(&self) -> Vec<Annotation> {
        self.store.open()
    }

    pub fn annotation(&self, id: &str) -> Option<Annotation> {
        self.store.get(id)
    }

    pub fn resolve(&self, id: &str) -> Result<Annotation> {
        self.store.resolve(id)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.store.delete(id)
    }

    pub async fn wait_for_send(&self, timeout: Duration) -> bool {
        self.rendezvous.wait(timeout).await
    }

    pub fn consume_sent_state(&self) -> bool {
        self.rendezvous.consume_sent_state()
    }
}

// ── routing ────────────────────────────────────────────────────────────

fn router(state: Arc<AnnotationService>) -> Router {
    Router::new()
        .route("/", get(health))
        .route(
            "/annotations",
            get(list_annotations)
                .post(create_annotation)
                .delete(delete_all_annotations),
        )
        .route("/annotations/send", post(send_annotations))
        .route(
            "/annotations/:id",
            patch(patch_annotation).delete(delete_annotation),
        )
        .route("/annotations/:id/resolve", post(resolve_annotation))
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn error_response(err: &BridgeError) -> Response {
    let status = match err {
        BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
        BridgeError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

async fn health(State(service): State<Arc<AnnotationService>>) -> Response {
    let port = service.port().await;
    Json(json!({
        "status": "ok",
        "count": service.store.count(),
        "port": port,
    }))
    .into_response()
}

async fn list_annotations(State(service): State<Arc<AnnotationService>>) -> Response {
    Json(service.store.snapshot()).into_response()
}

async fn create_annotation(
    State(service): State<Arc<AnnotationService>>,
    body: std::result::Result<Json<serde_json::Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(raw)) = body else {
        return error_response(&BridgeError::BadRequest(
            "Malformed JSON body".to_string(),
        ));
    };
    let parsed: CreateAnnotationBody = match serde_json::from_value(raw) {
        Ok(p) => p,
        Err(e) => return error_response(&BridgeError::BadRequest(format!("Invalid body: {e}"))),
    };
    let (mut annotation, rect) = match parsed.into_annotation() {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };

    // Screenshot is best-effort: a failed capture never fails creation.
    let hook = service.screenshot_hook.lock().unwrap().clone();
    if let (Some(hook), Some(rect)) = (hook, rect.filter(Rect::is_capturable)) {
        match hook(rect).await {
            Ok(data_url) => annotation.screenshot_data_url = Some(data_url),
            Err(e) => {
                tracing::warn!(error = %e, "Annotation screenshot capture failed")
            }
        }
    }

    let id = annotation.id.clone();
    match service.store.insert(annotation) {
        Ok(()) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn patch_annotation(
    State(service): State<Arc<AnnotationService>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<PatchAnnotationBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(patch)) = body else {
        return error_response(&BridgeError::BadRequest(
            "Malformed JSON body".to_string(),
        ));
    };
    let Some(text) = patch.text else {
        return match service.store.get(&id) {
            Some(ann) => Json(ann).into_response(),
            None => error_response(&BridgeError::NotFound(format!("annotation {id}"))),
        };
    };
    if let Err(e) = validate_text(&text) {
        return error_response(&e);
    }
    match service.store.update_text(&id, text) {
        Ok(ann) => Json(ann).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_annotation(
    State(service): State<Arc<AnnotationService>>,
    Path(id): Path<String>,
) -> Response {
    if service.store.delete(&id) {
        Json(json!({"success": true})).into_response()
    } else {
        error_response(&BridgeError::NotFound(format!("annotation {id}")))
    }
}

async fn delete_all_annotations(State(service): State<Arc<AnnotationService>>) -> Response {
    let deleted = service.store.clear();
    Json(json!({"success": true, "deleted": deleted})).into_response()
}

async fn resolve_annotation(
    State(service): State<Arc<AnnotationService>>,
    Path(id): Path<String>,
) -> Response {
    match service.store.resolve(&id) {
        Ok(ann) => Json(ann).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn send_annotations(State(service): State<Arc<AnnotationService>>) -> Response {
    service.rendezvous.fire();
    let open = service.store.open().len();
    let hook = service.send_notify.lock().unwrap().clone();
    if let Some(hook) = hook {
        hook(open);
    }
    Json(json!({"success": true})).into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Unknown route"})),
    )
        .into_response()
}

// ── CORS ───────────────────────────────────────────────────────────────

/// The origin is allowed iff it is an absolute http(s) URL with a loopback
/// hostname; allowed origins are echoed verbatim.
pub fn allowed_origin(origin: &str) -> Option<String> {
    let (scheme, rest) = origin.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    if rest.is_empty() {
        return None;
    }
    let host = url_host(origin)?;
    is_loopback_host(host).then(|| origin.to_string())
}

async fn cors(req: Request, next: Next) -> Response {
    let allow = match req.headers().get(header::ORIGIN) {
        None => Some(NEUTRAL_ORIGIN.to_string()),
        Some(value) => value.to_str().ok().and_then(allowed_origin),
    };

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(resp.headers_mut(), allow.as_deref(), true);
        return resp;
    }

    let mut resp = next.run(req).await;
    apply_cors_headers(resp.headers_mut(), allow.as_deref(), false);
    resp
}

fn apply_cors_headers(headers: &mut HeaderMap, allow: Option<&str>, preflight: bool) {
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    if let Some(origin) = allow {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    if preflight {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
    }
}
