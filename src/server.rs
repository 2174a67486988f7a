//! MCP bridge: exposes the tool registry over the agent transport and
//! applies the response-envelope augmentation to every outgoing result.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;
use serde_json::{json, Value};

use crate::annotations::Annotation;
use crate::overlay;
use crate::processing::ProcessingCoordinator;
use crate::tools::{sanitize_identifier, Block, ToolContext, ToolRegistry};

const INSTRUCTIONS: &str = "pagelens bridges this agent to a live browser page. \
Tools evaluate script, read buffered console/network telemetry, query the DOM, \
capture screenshots, and manage dev-server processes. A human can pin feedback \
onto page elements through the injected overlay; when they click Send, the open \
annotations are appended to the next tool result. Nothing touches the browser \
until the first tool call that needs it.";

#[derive(Clone)]
pub struct BridgeServer {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    coordinator: Arc<ProcessingCoordinator>,
}

impl BridgeServer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        ctx: ToolContext,
        coordinator: Arc<ProcessingCoordinator>,
    ) -> Self {
        Self {
            registry,
            ctx,
            coordinator,
        }
    }

    /// Envelope augmentation, applied after every tool's core logic:
    /// complete a previous processing cycle, drain a pending send into the
    /// response, or annotate the primary JSON block with the open count.
    async fn augment(&self, blocks: &mut Vec<Block>) {
        let sent = self.ctx.annotations.consume_sent_state();

        if !sent {
            self.coordinator.complete_if_processing().await;
            let open = self.ctx.annotations.open_annotations().len();
            if open > 0 {
                annotate_primary_json(blocks, open);
            }
            return;
        }

        let open = self.ctx.annotations.open_annotations();
        self.coordinator.begin_processing().await;

        for annotation in &open {
            blocks.push(Block::Text(format_annotation(annotation)));
            if let Some((mime, data)) = annotation
                .screenshot_data_url
                .as_deref()
                .and_then(parse_data_url)
            {
                blocks.push(Block::Image {
                    data_base64: data,
                    mime,
                });
            }
        }

        // Auto-resolve: badge out of the page, record out of the store.
        for annotation in &open {
            if let Ok(id) = sanitize_identifier(&annotation.id) {
                self.ctx
                    .session
                    .evaluate_if_connected(&overlay::remove_badge_script(id))
                    .await;
            }
            self.ctx.annotations.delete(&annotation.id);
        }
    }
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self
            .registry
            .definitions()
            .into_iter()
            .map(|def| {
                let schema = match def.input_schema {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                McpTool::new(def.name, def.description, Arc::new(schema))
            })
            .collect();
        Ok(ListToolsResult {
            tools,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = request.name.to_string();
        let input = request
            .arguments
            .map(Value::Object)
            .unwrap_or_else(|| json!({}));

        let Some(outcome) = self.registry.execute(&name, input, &self.ctx).await else {
            return Err(ErrorData::invalid_params(
                format!("Unknown tool: {name}"),
                None,
            ));
        };

        // Tool failures become error content; the connection never fails
        // because a tool did.
        match outcome {
            Ok(mut response) => {
                self.augment(&mut response.blocks).await;
                Ok(CallToolResult::success(to_contents(response.blocks)))
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool call failed");
                let mut blocks = vec![Block::Json(json!({"error": e.to_string()}))];
                self.augment(&mut blocks).await;
                Ok(CallToolResult::error(to_contents(blocks)))
            }
        }
    }
}

fn to_contents(blocks: Vec<Block>) -> Vec<Content> {
    blocks
        .into_iter()
        .map(|block| match block {
            Block::Json(value) => Content::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string()),
            ),
            Block::Text(text) => Content::text(text),
            Block::Image { data_base64, mime } => Content::image(data_base64, mime),
        })
        .collect()
}

/// Add `pending_annotations` to the primary JSON block, when there is one.
fn annotate_primary_json(blocks: &mut [Block], open: usize) {
    for block in blocks.iter_mut() {
        if let Block::Json(value) = block {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("pending_annotations".to_string(), json!(open));
            }
            return;
        }
    }
}

fn format_annotation(annotation: &Annotation) -> String {
    let mut out = format!(
        "User annotation {id}\nURL: {url}\nSelector: {selector} ({confidence:?})\nFeedback: {text}",
        id = annotation.id,
        url = annotation.url,
        selector = annotation.selector,
        confidence = annotation.selector_confidence,
        text = annotation.text,
    );
    if let Some(info) = &annotation.component_info {
        out.push_str(&format!("\nComponent: {}", info.component));
        if let Some(source) = &info.source {
            out.push_str(&format!(" ({source})"));
        }
    }
    if let Some(elements) = &annotation.elements {
        out.push_str(&format!("\nElements: {}", elements.len()));
        for el in elements {
            out.push_str(&format!("\n  - {}", el.selector));
        }
    }
    out
}

fn parse_data_url(data_url: &str) -> Option<(String, String)> {
    let rest = data_url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime.to_string(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::AnnotationService;
    use crate::browser::SessionManager;
    use crate::config::Config;
    use crate::procs::ProcessManager;

    fn context(annotation_port: u16) -> ToolContext {
        ToolContext {
            session: SessionManager::new(Config::default()),
            annotations: AnnotationService::new(annotation_port),
            processes: ProcessManager::new(100),
        }
    }

    fn server(ctx: &ToolContext) -> BridgeServer {
        BridgeServer::new(
            Arc::new(ToolRegistry::standard()),
            ctx.clone(),
            ProcessingCoordinator::new(ctx.session.clone()),
        )
    }

    async fn post_annotation(base: &str, text: &str) {
        let resp = reqwest::Client::new()
            .post(format!("{base}/annotations"))
            .json(&json!({
                "url": "http://localhost:3000/",
                "selector": "#app",
                "text": text,
                "viewport": {"width": 800, "height": 600}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    #[test]
    fn data_url_parsing() {
        let (mime, data) = parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "aGVsbG8=");
        assert!(parse_data_url("http://x/").is_none());
        assert!(parse_data_url("data:image/png,raw").is_none());
    }

    #[test]
    fn annotation_formatting_includes_the_essentials() {
        let (ann, _) = serde_json::from_value::<
            crate::annotations::types::CreateAnnotationBody,
        >(json!({
            "url": "http://localhost:3000/admin",
            "selector": "#save",
            "selectorConfidence": "stable",
            "text": "label is wrong",
            "viewport": {"width": 800, "height": 600},
            "reactSource": {"component": "SaveButton", "source": "src/Save.tsx:10"}
        }))
        .unwrap()
        .into_annotation()
        .unwrap();

        let text = format_annotation(&ann);
        assert!(text.contains("http://localhost:3000/admin"));
        assert!(text.contains("#save"));
        assert!(text.contains("label is wrong"));
        assert!(text.contains("SaveButton"));
        assert!(text.contains("src/Save.tsx:10"));
    }

    #[test]
    fn pending_count_lands_on_the_first_json_block() {
        let mut blocks = vec![
            Block::Text("hi".to_string()),
            Block::Json(json!({"result": 1})),
            Block::Json(json!({"other": 2})),
        ];
        annotate_primary_json(&mut blocks, 3);
        match &blocks[1] {
            Block::Json(v) => assert_eq!(v["pending_annotations"], 3),
            other => panic!("unexpected block {other:?}"),
        }
        match &blocks[2] {
            Block::Json(v) => assert!(v.get("pending_annotations").is_none()),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn augment_adds_pending_count_when_no_send() {
        let ctx = context(42300);
        let port = ctx.annotations.start().await.unwrap();
        let base = format!("http://127.0.0.1:{port}");
        post_annotation(&base, "open one").await;

        let server = server(&ctx);
        let mut blocks = vec![Block::Json(json!({"result": "ok"}))];
        server.augment(&mut blocks).await;

        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            Block::Json(v) => assert_eq!(v["pending_annotations"], 1),
            other => panic!("unexpected block {other:?}"),
        }
        // Annotation is untouched without a send.
        assert_eq!(ctx.annotations.annotations().len(), 1);
    }

    #[tokio::test]
    async fn augment_drains_a_send_into_the_response_and_auto_resolves() {
        let ctx = context(42310);
        let port = ctx.annotations.start().await.unwrap();
        let base = format!("http://127.0.0.1:{port}");
        post_annotation(&base, "fix the header").await;
        reqwest::Client::new()
            .post(format!("{base}/annotations/send"))
            .send()
            .await
            .unwrap();

        let server = server(&ctx);
        let mut blocks = vec![Block::Json(json!({"result": "ok"}))];
        server.augment(&mut blocks).await;

        assert!(blocks.len() >= 2, "annotation block appended");
        let text = blocks
            .iter()
            .find_map(|b| match b {
                Block::Text(t) => Some(t.clone()),
                _ => None,
            })
            .expect("annotation text block");
        assert!(text.contains("fix the header"));

        // Auto-resolve deleted the sent annotation and entered processing.
        assert!(ctx.annotations.annotations().is_empty());
        assert!(server.coordinator.is_processing().await);

        // The next non-send cycle completes the processing state.
        let mut next = vec![Block::Json(json!({"result": "later"}))];
        server.augment(&mut next).await;
        assert!(!server.coordinator.is_processing().await);
        match &next[0] {
            Block::Json(v) => assert!(v.get("pending_annotations").is_none()),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_consumption_is_visible_exactly_once() {
        let ctx = context(42320);
        let port = ctx.annotations.start().await.unwrap();
        let base = format!("http://127.0.0.1:{port}");
        reqwest::Client::new()
            .post(format!("{base}/annotations/send"))
            .send()
            .await
            .unwrap();

        let server = server(&ctx);
        let mut first = vec![Block::Json(json!({}))];
        server.augment(&mut first).await;
        assert!(server.coordinator.is_processing().await);

        let mut second = vec![Block::Json(json!({}))];
        server.augment(&mut second).await;
        assert!(!server.coordinator.is_processing().await);
    }
}
