//! Browser tools: diagnostics, page selection, evaluation, telemetry
//! retrieval, DOM querying, screenshots, and navigation.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{truncate_body, Tool, ToolContext, ToolResponse};
use crate::browser::session::TargetQuery;
use crate::error::{BridgeError, Result};

/// Ceiling for `browser_wait`.
const MAX_WAIT_MS: u64 = 60_000;
/// Ceiling for target-appearance waits.
const MAX_TARGET_WAIT_MS: u64 = 120_000;

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| BridgeError::BadRequest(format!("Invalid input: {e}")))
}

// ============================================================================
// browser_status
// ============================================================================

pub struct BrowserStatusTool;

#[async_trait]
impl Tool for BrowserStatusTool {
    fn name(&self) -> &'static str {
        "browser_status"
    }

    fn description(&self) -> String {
        "Report browser-connection diagnostics: whether a page session is active, which target it is attached to, and how much telemetry is buffered. Never connects by itself.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        Ok(ToolResponse::json(ctx.session.status().await))
    }
}

// ============================================================================
// browser_select_page
// ============================================================================

#[derive(Debug, Deserialize)]
struct SelectPageInput {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url_pattern: Option<String>,
    #[serde(default)]
    wait_ms: Option<u64>,
}

pub struct BrowserSelectPageTool;

#[async_trait]
impl Tool for BrowserSelectPageTool {
    fn name(&self) -> &'static str {
        "browser_select_page"
    }

    fn description(&self) -> String {
        "Attach the session to a specific page by target id or case-insensitive URL substring. The choice is remembered and re-applied on later reconnects. With wait_ms, polls until a matching target appears.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Exact devtools target id"
                },
                "url_pattern": {
                    "type": "string",
                    "description": "Case-insensitive substring matched against target URLs"
                },
                "wait_ms": {
                    "type": "integer",
                    "description": "How long to wait for a matching target to appear (default: no wait)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: SelectPageInput = parse_input(input)?;
        let query = match (input.id, input.url_pattern) {
            (Some(id), _) => TargetQuery::Id(id),
            (None, Some(pattern)) => TargetQuery::Pattern(pattern),
            (None, None) => {
                return Err(BridgeError::BadRequest(
                    "Provide either 'id' or 'url_pattern'".to_string(),
                ))
            }
        };
        let wait_ms = input.wait_ms.map(|ms| ms.min(MAX_TARGET_WAIT_MS));
        let target = ctx.session.connect_to_page(query, wait_ms).await?;
        Ok(ToolResponse::json(json!({
            "selected": {
                "id": target.id,
                "title": target.title,
                "url": target.url,
            }
        })))
    }
}

// ============================================================================
// browser_eval
// ============================================================================

#[derive(Debug, Deserialize)]
struct EvalInput {
    expression: String,
    #[serde(default = "default_true")]
    r#await: bool,
}

fn default_true() -> bool {
    true
}

pub struct BrowserEvalTool;

#[async_trait]
impl Tool for BrowserEvalTool {
    fn name(&self) -> &'static str {
        "browser_eval"
    }

    fn description(&self) -> String {
        "Evaluate a JavaScript expression in the page and return its JSON value (10s budget). A throwing script returns the exception text rather than failing the call.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "JavaScript expression to evaluate"
                },
                "await": {
                    "type": "boolean",
                    "description": "Wait for promises to resolve (default: true)"
                }
            },
            "required": ["expression"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: EvalInput = parse_input(input)?;
        let expression = if input.r#await {
            format!("(async () => {{ return ({}); }})()", input.expression)
        } else {
            input.expression
        };
        let value = ctx.session.evaluate(&expression).await?;
        Ok(ToolResponse::json(json!({
            "result": value.unwrap_or(Value::Null),
        })))
    }
}

// ============================================================================
// browser_console_logs
// ============================================================================

pub struct BrowserConsoleLogsTool;

#[async_trait]
impl Tool for BrowserConsoleLogsTool {
    fn name(&self) -> &'static str {
        "browser_console_logs"
    }

    fn description(&self) -> String {
        "Drain buffered console output (page console.* calls plus [browser]-prefixed browser log entries). Entries are removed once returned.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        // Drain only; connection is not required to read what was buffered.
        let entries = ctx.session.buffers().drain_console();
        Ok(ToolResponse::json(json!({
            "count": entries.len(),
            "entries": entries,
        })))
    }
}

// ============================================================================
// browser_network_requests
// ============================================================================

pub struct BrowserNetworkRequestsTool;

#[async_trait]
impl Tool for BrowserNetworkRequestsTool {
    fn name(&self) -> &'static str {
        "browser_network_requests"
    }

    fn description(&self) -> String {
        "Drain buffered completed network requests (status and timing, or the failure reason). Entries are removed once returned.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let entries = ctx.session.buffers().drain_network();
        Ok(ToolResponse::json(json!({
            "count": entries.len(),
            "entries": entries,
        })))
    }
}

// ============================================================================
// browser_network_detail
// ============================================================================

#[derive(Debug, Deserialize)]
struct NetworkDetailInput {
    request_id: String,
    #[serde(default)]
    include_request_body: bool,
}

pub struct BrowserNetworkDetailTool;

#[async_trait]
impl Tool for BrowserNetworkDetailTool {
    fn name(&self) -> &'static str {
        "browser_network_detail"
    }

    fn description(&self) -> String {
        "Fetch the response body (and optionally the request post data) for a request id reported by browser_network_requests. Bodies are truncated at 10 KiB.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_id": {
                    "type": "string",
                    "description": "Request id from browser_network_requests"
                },
                "include_request_body": {
                    "type": "boolean",
                    "description": "Also fetch the request post data (default: false)"
                }
            },
            "required": ["request_id"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: NetworkDetailInput = parse_input(input)?;
        let (body, base64_encoded) = ctx.session.response_body(&input.request_id).await?;
        let (body, truncated) = truncate_body(&body);

        let mut out = json!({
            "requestId": input.request_id,
            "responseBody": body,
            "responseBodyBase64": base64_encoded,
            "responseBodyTruncated": truncated,
        });
        if input.include_request_body {
            match ctx.session.request_post_data(&input.request_id).await {
                Ok(post_data) => {
                    let (post_data, truncated) = truncate_body(&post_data);
                    out["requestBody"] = json!(post_data);
                    out["requestBodyTruncated"] = json!(truncated);
                }
                Err(e) => {
                    out["requestBody"] = Value::Null;
                    out["requestBodyError"] = json!(e.to_string());
                }
            }
        }
        Ok(ToolResponse::json(out))
    }
}

// ============================================================================
// browser_query_dom
// ============================================================================

#[derive(Debug, Deserialize)]
struct QueryDomInput {
    selector: String,
    #[serde(default = "default_dom_limit")]
    limit: usize,
}

fn default_dom_limit() -> usize {
    10
}

pub struct BrowserQueryDomTool;

#[async_trait]
impl Tool for BrowserQueryDomTool {
    fn name(&self) -> &'static str {
        "browser_query_dom"
    }

    fn description(&self) -> String {
        "Run querySelectorAll against the live DOM and return the outer HTML of each match (up to `limit` nodes, default 10).".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "CSS selector"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum matches to return (default: 10)"
                }
            },
            "required": ["selector"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: QueryDomInput = parse_input(input)?;
        let limit = input.limit.clamp(1, 100);
        let nodes = ctx.session.query_dom(&input.selector, limit).await?;
        Ok(ToolResponse::json(json!({
            "selector": input.selector,
            "count": nodes.len(),
            "nodes": nodes,
        })))
    }
}

// ============================================================================
// browser_wait
// ============================================================================

#[derive(Debug, Deserialize)]
struct WaitInput {
    ms: u64,
}

pub struct BrowserWaitTool;

#[async_trait]
impl Tool for BrowserWaitTool {
    fn name(&self) -> &'static str {
        "browser_wait"
    }

    fn description(&self) -> String {
        "Wait the given number of milliseconds (max 60s), then return the console and network telemetry that accumulated. Useful right after an interaction that triggers async work.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ms": {
                    "type": "integer",
                    "description": "Milliseconds to wait (capped at 60000)"
                }
            },
            "required": ["ms"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: WaitInput = parse_input(input)?;
        let ms = input.ms.min(MAX_WAIT_MS);
        // Make sure events are flowing before we sit and wait for them.
        ctx.session.ensure_connected().await?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let buffers = ctx.session.buffers();
        Ok(ToolResponse::json(json!({
            "waitedMs": ms,
            "console": buffers.drain_console(),
            "network": buffers.drain_network(),
        })))
    }
}

// ============================================================================
// browser_screenshot
// ============================================================================

pub struct BrowserScreenshotTool;

#[async_trait]
impl Tool for BrowserScreenshotTool {
    fn name(&self) -> &'static str {
        "browser_screenshot"
    }

    fn description(&self) -> String {
        "Capture the current viewport as a PNG image.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let png = ctx.session.screenshot_viewport().await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        Ok(ToolResponse::json(json!({"bytes": png.len()})).with_image(encoded, "image/png"))
    }
}

// ============================================================================
// browser_reload
// ============================================================================

pub struct BrowserReloadTool;

#[async_trait]
impl Tool for BrowserReloadTool {
    fn name(&self) -> &'static str {
        "browser_reload"
    }

    fn description(&self) -> String {
        "Reload the current page.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        ctx.session.reload().await?;
        Ok(ToolResponse::json(json!({"reloaded": true})))
    }
}

// ============================================================================
// browser_navigate
// ============================================================================

#[derive(Debug, Deserialize)]
struct NavigateInput {
    url: String,
}

pub struct BrowserNavigateTool;

/// Schemes the navigation tool will touch.
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "file"];

pub(crate) fn validate_navigation_url(url: &str) -> Result<()> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or("");
    if ALLOWED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(BridgeError::BadRequest(format!(
            "Refusing to navigate to {url:?}: scheme must be one of http, https, file"
        )))
    }
}

#[async_trait]
impl Tool for BrowserNavigateTool {
    fn name(&self) -> &'static str {
        "browser_navigate"
    }

    fn description(&self) -> String {
        "Navigate the attached page to an http(s) or file URL and wait for the load.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Destination URL (http, https, or file)"
                }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: NavigateInput = parse_input(input)?;
        validate_navigation_url(&input.url)?;
        ctx.session.navigate(&input.url).await?;
        Ok(ToolResponse::json(json!({"navigated": input.url})))
    }
}
