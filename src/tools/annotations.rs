//! Overlay injection and annotation tools.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{sanitize_identifier, Tool, ToolContext, ToolResponse};
use crate::error::{BridgeError, Result};
use crate::overlay;

/// `annotations_wait_for_send` deadline cap.
const MAX_SEND_WAIT_MS: u64 = 600_000;
const DEFAULT_SEND_WAIT_MS: u64 = 30_000;

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| BridgeError::BadRequest(format!("Invalid input: {e}")))
}

// ============================================================================
// overlay_inject
// ============================================================================

pub struct OverlayInjectTool;

#[async_trait]
impl Tool for OverlayInjectTool {
    fn name(&self) -> &'static str {
        "overlay_inject"
    }

    fn description(&self) -> String {
        "(Re)inject the feedback overlay into the current page. Injection is idempotent — a second injection refreshes the badges instead of duplicating the UI.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let port = ctx.annotations.start().await?;
        let script = overlay::build_script(port);
        ctx.session.evaluate(&script).await?;
        Ok(ToolResponse::json(json!({
            "injected": true,
            "annotationPort": port,
        })))
    }
}

// ============================================================================
// annotations_list
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListInput {
    #[serde(default)]
    open_only: bool,
}

pub struct AnnotationsListTool;

#[async_trait]
impl Tool for AnnotationsListTool {
    fn name(&self) -> &'static str {
        "annotations_list"
    }

    fn description(&self) -> String {
        "List annotations the user has pinned in the page, including selectors, text, and screenshot availability.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "open_only": {
                    "type": "boolean",
                    "description": "Only return open annotations (default: false)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: ListInput = parse_input(input)?;
        let annotations = if input.open_only {
            ctx.annotations.open_annotations()
        } else {
            ctx.annotations.annotations()
        };
        Ok(ToolResponse::json(json!({
            "count": annotations.len(),
            "annotations": annotations,
        })))
    }
}

// ============================================================================
// annotation_resolve
// ============================================================================

#[derive(Debug, Deserialize)]
struct ResolveInput {
    id: String,
}

pub struct AnnotationResolveTool;

#[async_trait]
impl Tool for AnnotationResolveTool {
    fn name(&self) -> &'static str {
        "annotation_resolve"
    }

    fn description(&self) -> String {
        "Mark an annotation resolved and remove its badge from the page.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Annotation id"
                }
            },
            "required": ["id"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: ResolveInput = parse_input(input)?;
        let id = sanitize_identifier(&input.id)?;
        let annotation = ctx.annotations.resolve(id)?;
        ctx.session
            .evaluate_if_connected(&overlay::remove_badge_script(id))
            .await;
        Ok(ToolResponse::json(json!({"annotation": annotation})))
    }
}

// ============================================================================
// annotations_wait_for_send
// ============================================================================

#[derive(Debug, Deserialize)]
struct WaitForSendInput {
    #[serde(default = "default_send_wait")]
    timeout_ms: u64,
}

fn default_send_wait() -> u64 {
    DEFAULT_SEND_WAIT_MS
}

pub struct AnnotationsWaitForSendTool;

#[async_trait]
impl Tool for AnnotationsWaitForSendTool {
    fn name(&self) -> &'static str {
        "annotations_wait_for_send"
    }

    fn description(&self) -> String {
        "Block until the user clicks Send in the overlay (or the timeout passes). A newer wait supersedes an older one.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timeout_ms": {
                    "type": "integer",
                    "description": "Deadline in milliseconds (default 30000, max 600000)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: WaitForSendInput = parse_input(input)?;
        let timeout = Duration::from_millis(input.timeout_ms.min(MAX_SEND_WAIT_MS));
        let triggered = ctx.annotations.wait_for_send(timeout).await;
        Ok(ToolResponse::json(json!({
            "triggered": triggered,
            "openAnnotations": ctx.annotations.open_annotations().len(),
        })))
    }
}
