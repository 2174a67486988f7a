//! Event pipelines: raw CDP events become console and network entries in
//! bounded buffers.
//!
//! Network request/response/failure events are correlated by request id
//! through a pending map. Long-lived streams (SSE, WebSocket, long-poll)
//! never complete, so the pending map is swept by age rather than size.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::js_protocol::runtime::{RemoteObject, RemoteObjectType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::ring::RingBuffer;

/// Pending requests older than this are assumed to never complete.
pub const PENDING_MAX_AGE: Duration = Duration::from_secs(5 * 60);
/// How often the sweep task looks for stale pending requests.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkEntry {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    url: String,
    method: String,
    /// CDP monotonic timestamp (seconds) from requestWillBeSent.
    start_monotonic: f64,
    wall_clock: DateTime<Utc>,
    seen_at: Instant,
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a console-call argument list to one line: strings verbatim,
/// undefined as the literal `undefined`, JSON-representable values
/// stringified, anything else a descriptive placeholder.
pub fn render_console_args(args: &[RemoteObject]) -> String {
    args.iter()
        .map(render_console_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_console_arg(arg: &RemoteObject) -> String {
    if matches!(arg.r#type, RemoteObjectType::Undefined) {
        return "undefined".to_string();
    }
    if let Some(value) = &arg.value {
        return match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(unser) = &arg.unserializable_value {
        return unser.inner().clone();
    }
    if let Some(desc) = &arg.description {
        return desc.clone();
    }
    format!("[{:?}]", arg.r#type).to_lowercase()
}

/// Owner of both telemetry buffers and the pending-request map. All three
/// sit behind plain mutexes with short critical sections; nothing awaits
/// while holding one.
pub struct TelemetryBuffers {
    console: Mutex<RingBuffer<ConsoleEntry>>,
    network: Mutex<RingBuffer<NetworkEntry>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl TelemetryBuffers {
    pub fn new(console_capacity: usize, network_capacity: usize) -> Self {
        Self {
            console: Mutex::new(RingBuffer::new(console_capacity)),
            network: Mutex::new(RingBuffer::new(network_capacity)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Page `console.*` call.
    pub fn push_console(&self, level: impl Into<String>, message: impl Into<String>) {
        let entry = ConsoleEntry {
            timestamp: iso_now(),
            level: level.into(),
            message: message.into(),
        };
        self.console.lock().unwrap().push(entry);
    }

    /// Browser-level log entry (Log domain); distinguished by prefix.
    pub fn push_browser_log(&self, level: impl Into<String>, message: &str) {
        self.push_console(level, format!("[browser] {message}"));
    }

    pub fn drain_console(&self) -> Vec<ConsoleEntry> {
        self.console.lock().unwrap().drain()
    }

    pub fn console_len(&self) -> usize {
        self.console.lock().unwrap().len()
    }

    pub fn on_request_will_be_sent(
        &self,
        id: &str,
        url: &str,
        method: &str,
        monotonic_secs: f64,
    ) {
        let pending = PendingRequest {
            url: url.to_string(),
            method: method.to_string(),
            start_monotonic: monotonic_secs,
            wall_clock: Utc::now(),
            seen_at: Instant::now(),
        };
        self.pending.lock().unwrap().insert(id.to_string(), pending);
    }

    /// Completes a pending request into a NetworkEntry with timing. Unknown
    /// ids (eg. requests announced before we attached) are ignored.
    pub fn on_response_received(&self, id: &str, status: i64, monotonic_secs: f64) {
        let Some(pending) = self.pending.lock().unwrap().remove(id) else {
            return;
        };
        let timing_ms = round2((monotonic_secs - pending.start_monotonic) * 1000.0);
        let entry = NetworkEntry {
            id: id.to_string(),
            url: pending.url,
            method: pending.method,
            status: Some(status),
            timing_ms: Some(timing_ms),
            error: None,
            timestamp: pending
                .wall_clock
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.network.lock().unwrap().push(entry);
    }

    pub fn on_loading_failed(&self, id: &str, error_text: &str, monotonic_secs: f64) {
        let Some(pending) = self.pending.lock().unwrap().remove(id) else {
            return;
        };
        let timing_ms = round2((monotonic_secs - pending.start_monotonic) * 1000.0);
        let entry = NetworkEntry {
            id: id.to_string(),
            url: pending.url,
            method: pending.method,
            status: None,
            timing_ms: Some(timing_ms),
            error: Some(error_text.to_string()),
            timestamp: pending
                .wall_clock
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.network.lock().unwrap().push(entry);
    }

    pub fn drain_network(&self) -> Vec<NetworkEntry> {
        self.network.lock().unwrap().drain()
    }

    pub fn network_len(&self) -> usize {
        self.network.lock().unwrap().len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Drop pending requests that will evidently never complete.
    pub fn sweep_stale_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, p| p.seen_at.elapsed() <= PENDING_MAX_AGE);
        let evicted = before - pending.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale pending network requests");
        }
    }

    /// Called on disconnect: in-flight correlation state is meaningless for
    /// a new session.
    pub fn clear_pending(&self) {
        self.pending.lock().unwrap().clear();
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_object(v: serde_json::Value) -> RemoteObject {
        serde_json::from_value(v).expect("valid RemoteObject")
    }

    #[test]
    fn console_args_render_per_kind() {
        let args = vec![
            remote_object(json!({"type": "string", "value": "hello"})),
            remote_object(json!({"type": "undefined"})),
            remote_object(json!({"type": "number", "value": 42})),
            remote_object(json!({"type": "object", "value": {"a": 1}})),
            remote_object(json!({"type": "function", "description": "function f() {}"})),
            remote_object(json!({"type": "number", "unserializableValue": "NaN"})),
        ];
        assert_eq!(
            render_console_args(&args),
            r#"hello undefined 42 {"a":1} function f() {} NaN"#
        );
    }

    #[test]
    fn console_arg_without_anything_gets_placeholder() {
        let arg = remote_object(json!({"type": "symbol"}));
        assert_eq!(render_console_arg(&arg), "[symbol]");
    }

    #[test]
    fn browser_log_is_prefixed() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.push_browser_log("warning", "mixed content");
        let drained = buffers.drain_console();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message, "[browser] mixed content");
        assert_eq!(drained[0].level, "warning");
    }

    #[test]
    fn response_correlates_with_request_and_times_it() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_request_will_be_sent("r1", "http://localhost:3000/api", "GET", 100.0);
        assert_eq!(buffers.pending_len(), 1);
        buffers.on_response_received("r1", 200, 100.1234);
        assert_eq!(buffers.pending_len(), 0);

        let entries = buffers.drain_network();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.id, "r1");
        assert_eq!(e.url, "http://localhost:3000/api");
        assert_eq!(e.method, "GET");
        assert_eq!(e.status, Some(200));
        assert_eq!(e.timing_ms, Some(123.4));
        assert!(e.error.is_none());
    }

    #[test]
    fn failure_records_error_without_status() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_request_will_be_sent("r2", "http://localhost:3000/x", "POST", 5.0);
        buffers.on_loading_failed("r2", "net::ERR_CONNECTION_REFUSED", 5.5);

        let entries = buffers.drain_network();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, None);
        assert_eq!(
            entries[0].error.as_deref(),
            Some("net::ERR_CONNECTION_REFUSED")
        );
        assert_eq!(entries[0].timing_ms, Some(500.0));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_response_received("never-seen", 200, 1.0);
        buffers.on_loading_failed("never-seen", "boom", 1.0);
        assert_eq!(buffers.network_len(), 0);
    }

    #[test]
    fn clear_pending_drops_in_flight_requests() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_request_will_be_sent("r3", "http://localhost/x", "GET", 1.0);
        buffers.clear_pending();
        buffers.on_response_received("r3", 200, 2.0);
        assert_eq!(buffers.network_len(), 0);
    }

    #[test]
    fn sweep_keeps_fresh_requests() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_request_will_be_sent("r4", "http://localhost/sse", "GET", 1.0);
        buffers.sweep_stale_pending();
        assert_eq!(buffers.pending_len(), 1);
    }

    #[test]
    fn network_serialization_omits_absent_fields() {
        let buffers = TelemetryBuffers::new(10, 10);
        buffers.on_request_will_be_sent("r5", "http://localhost/a", "GET", 1.0);
        buffers.on_response_received("r5", 304, 1.01);
        let entries = buffers.drain_network();
        let value = serde_json::to_value(&entries[0]).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["status"], 304);
    }
}
