//! Managed dev-server tools.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolResponse};
use crate::error::{BridgeError, Result};
use crate::procs::StartSpec;

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| BridgeError::BadRequest(format!("Invalid input: {e}")))
}

// ============================================================================
// server_start
// ============================================================================

#[derive(Debug, Deserialize)]
struct StartInput {
    id: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

pub struct ServerStartTool;

#[async_trait]
impl Tool for ServerStartTool {
    fn name(&self) -> &'static str {
        "server_start"
    }

    fn description(&self) -> String {
        "Start a long-running dev-server process under a caller-chosen id; its stdout/stderr stream into a bounded log buffer readable via server_logs.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Unique handle for this process (e.g. 'vite')"
                },
                "command": {
                    "type": "string",
                    "description": "Executable to run"
                },
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Arguments"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (default: inherited)"
                },
                "env": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Extra environment variables"
                }
            },
            "required": ["id", "command"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: StartInput = parse_input(input)?;
        if input.id.trim().is_empty() {
            return Err(BridgeError::BadRequest("id must not be empty".to_string()));
        }
        let descriptor = ctx
            .processes
            .start(StartSpec {
                id: input.id,
                command: input.command,
                args: input.args,
                cwd: input.cwd,
                env: input.env,
            })
            .await?;
        Ok(ToolResponse::json(json!({"success": true, "process": descriptor})))
    }
}

// ============================================================================
// server_stop
// ============================================================================

#[derive(Debug, Deserialize)]
struct StopInput {
    id: String,
}

pub struct ServerStopTool;

#[async_trait]
impl Tool for ServerStopTool {
    fn name(&self) -> &'static str {
        "server_stop"
    }

    fn description(&self) -> String {
        "Stop a managed process: SIGTERM to its process tree, then SIGKILL after a grace period. The exit status stays available via server_list.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Process id given to server_start"
                }
            },
            "required": ["id"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: StopInput = parse_input(input)?;
        let descriptor = ctx.processes.stop(&input.id).await?;
        Ok(ToolResponse::json(json!({"success": true, "process": descriptor})))
    }
}

// ============================================================================
// server_list
// ============================================================================

pub struct ServerListTool;

#[async_trait]
impl Tool for ServerListTool {
    fn name(&self) -> &'static str {
        "server_list"
    }

    fn description(&self) -> String {
        "List managed processes with pid, running state, and recorded exit status.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let processes = ctx.processes.list().await;
        Ok(ToolResponse::json(json!({
            "count": processes.len(),
            "processes": processes,
        })))
    }
}

// ============================================================================
// server_logs
// ============================================================================

#[derive(Debug, Deserialize)]
struct LogsInput {
    id: String,
    #[serde(default)]
    clear: bool,
}

pub struct ServerLogsTool;

#[async_trait]
impl Tool for ServerLogsTool {
    fn name(&self) -> &'static str {
        "server_logs"
    }

    fn description(&self) -> String {
        "Read a managed process's buffered stdout/stderr lines; with clear=true the buffer is emptied after the read.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Process id given to server_start"
                },
                "clear": {
                    "type": "boolean",
                    "description": "Empty the buffer after reading (default: false)"
                }
            },
            "required": ["id"]
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolResponse> {
        let input: LogsInput = parse_input(input)?;
        let logs = ctx.processes.logs(&input.id, input.clear).await?;
        Ok(ToolResponse::json(logs))
    }
}
