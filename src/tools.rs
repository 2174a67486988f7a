//! Tool implementations exposed to the agent.

pub mod annotations;
pub mod browser;
pub mod processes;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::annotations::AnnotationService;
use crate::browser::SessionManager;
use crate::error::{BridgeError, Result};
use crate::procs::ProcessManager;

/// Inline cap for network body payloads returned to the agent.
pub const BODY_PREVIEW_LIMIT: usize = 10 * 1024;

/// One content block of a tool response.
#[derive(Debug, Clone)]
pub enum Block {
    Json(Value),
    Text(String),
    Image { data_base64: String, mime: String },
}

/// Result of tool execution, as an ordered list of content blocks. The
/// first JSON block is the primary payload the envelope augmentation may
/// annotate.
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    pub blocks: Vec<Block>,
}

impl ToolResponse {
    pub fn json(value: impl serde::Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        Self {
            blocks: vec![Block::Json(value)],
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![Block::Text(text.into())],
        }
    }

    pub fn with_image(mut self, data_base64: String, mime: impl Into<String>) -> Self {
        self.blocks.push(Block::Image {
            data_base64,
            mime: mime.into(),
        });
        self
    }
}

/// Handles to the owning components; tools never share state directly.
#[derive(Clone)]
pub struct ToolContext {
    pub session: Arc<SessionManager>,
    pub annotations: Arc<AnnotationService>,
    pub processes: Arc<ProcessManager>,
}

/// A named operation the agent may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-sentence description shown to the agent.
    fn description(&self) -> String;

    /// JSON Schema for the tool input.
    fn input_schema(&self) -> Value;

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse>;
}

pub struct ToolDefinition {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// The standard tool set.
    pub fn standard() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(browser::BrowserStatusTool),
            Arc::new(browser::BrowserSelectPageTool),
            Arc::new(browser::BrowserEvalTool),
            Arc::new(browser::BrowserConsoleLogsTool),
            Arc::new(browser::BrowserNetworkRequestsTool),
            Arc::new(browser::BrowserNetworkDetailTool),
            Arc::new(browser::BrowserQueryDomTool),
            Arc::new(browser::BrowserWaitTool),
            Arc::new(browser::BrowserScreenshotTool),
            Arc::new(browser::BrowserReloadTool),
            Arc::new(browser::BrowserNavigateTool),
            Arc::new(processes::ServerStartTool),
            Arc::new(processes::ServerStopTool),
            Arc::new(processes::ServerListTool),
            Arc::new(processes::ServerLogsTool),
            Arc::new(annotations::OverlayInjectTool),
            Arc::new(annotations::AnnotationsListTool),
            Arc::new(annotations::AnnotationResolveTool),
            Arc::new(annotations::AnnotationsWaitForSendTool),
        ];
        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name. `None` means no such tool is registered.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Option<Result<ToolResponse>> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}

/// Whitelist an identifier before it is interpolated into a page-script
/// expression. Annotation ids are UUIDs, so [a-f0-9-] covers every legal
/// value; anything else is refused rather than escaped.
pub fn sanitize_identifier(id: &str) -> Result<&str> {
    if !id.is_empty()
        && id
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        Ok(id)
    } else {
        Err(BridgeError::BadRequest(format!(
            "Identifier contains characters outside [a-f0-9-]: {id:?}"
        )))
    }
}

/// Cap a body payload for inline return; the flag tells the agent the tail
/// was cut.
pub fn truncate_body(body: &str) -> (String, bool) {
    if body.len() <= BODY_PREVIEW_LIMIT {
        return (body.to_string(), false);
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}…Truncated", &body[..end]), true)
}
