// Built-in tools. Shell is flagged dangerous and only ever reaches the
// registry wrapped in the confirmation protocol.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use gatehouse_core::TaskContext;
use gatehouse_types::{ToolResult, ToolSchema};

use crate::Tool;

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ShellTool),
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
    ]
}

struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "shell".to_string(),
            description: "Run a shell command".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "env": {"type": "object"}
                },
                "required": ["command"]
            }),
        }
    }

    fn dangerous(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> anyhow::Result<ToolResult> {
        let cmd = args["command"].as_str().unwrap_or("");
        if cmd.is_empty() {
            anyhow::bail!("shell tool requires a command");
        }
        let mut command = Command::new("sh");
        command.args(["-c", cmd]);
        if let Some(env) = args.get("env").and_then(|v| v.as_object()) {
            for (k, v) in env {
                if let Some(value) = v.as_str() {
                    command.env(k, value);
                }
            }
        }
        let mut child = command
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;
        let status = tokio::select! {
            _ = ctx.cancel_token().cancelled() => {
                let _ = child.kill().await;
                return Ok(ToolResult {
                    output: "command cancelled".to_string(),
                    metadata: json!({"cancelled": true}),
                });
            }
            result = child.wait() => result?,
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).await?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_end(&mut stderr).await?;
        }
        Ok(ToolResult {
            output: String::from_utf8_lossy(&stdout).to_string(),
            metadata: json!({
                "stderr": String::from_utf8_lossy(&stderr),
                "status": status.code(),
            }),
        })
    }
}

struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file".to_string(),
            description: "Read file contents".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &TaskContext) -> anyhow::Result<ToolResult> {
        let path = args["path"].as_str().unwrap_or("");
        if path.is_empty() {
            anyhow::bail!("read_file tool requires a path");
        }
        let data = fs::read_to_string(path).await?;
        Ok(ToolResult::text(data))
    }
}

struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file".to_string(),
            description: "Write file contents".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &TaskContext) -> anyhow::Result<ToolResult> {
        let path = args["path"].as_str().unwrap_or("");
        if path.is_empty() {
            anyhow::bail!("write_file tool requires a path");
        }
        let content = args["content"].as_str().unwrap_or("");
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(ToolResult {
            output: format!("wrote {} bytes to {}", content.len(), path),
            metadata: json!({"path": path}),
        })
    }
}
