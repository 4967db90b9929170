//! Wires `sa_tools::{exec, process}` up as dialog-core's
//! [`sa_dialog_core::contract::ToolExecutor`] seam. Grounded on
//! `sa-gateway::runtime::tools`'s dispatch-by-name-then-serialize shape
//! from the teacher, narrowed to the two built-in tools `sa-tools` ships.

use async_trait::async_trait;
use sa_dialog_core::contract::{tool_execution_error, unknown_call_error, ToolCallContext, ToolExecutor};
use sa_domain::config::ToolsConfig;
use sa_tools::exec::{exec, ExecRequest};
use sa_tools::manager::ProcessManager;
use sa_tools::process::{handle_process, ProcessRequest};

const TOOL_NAMES: &[&str] = &["exec", "process"];

pub struct GatewayToolExecutor {
    manager: ProcessManager,
}

impl GatewayToolExecutor {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            manager: ProcessManager::new(config.exec.clone()),
        }
    }
}

#[async_trait]
impl ToolExecutor for GatewayToolExecutor {
    async fn call(&self, name: &str, args: serde_json::Value, _ctx: ToolCallContext) -> String {
        match name {
            "exec" => {
                let req: ExecRequest = match serde_json::from_value(args) {
                    Ok(req) => req,
                    Err(e) => return tool_execution_error(format!("invalid exec args: {e}")),
                };
                let resp = exec(&self.manager, req).await;
                serde_json::to_string(&resp)
                    .unwrap_or_else(|e| tool_execution_error(format!("encoding exec result: {e}")))
            }
            "process" => {
                let req: ProcessRequest = match serde_json::from_value(args) {
                    Ok(req) => req,
                    Err(e) => return tool_execution_error(format!("invalid process args: {e}")),
                };
                let resp = handle_process(&self.manager, req).await;
                serde_json::to_string(&resp)
                    .unwrap_or_else(|e| tool_execution_error(format!("encoding process result: {e}")))
            }
            other => unknown_call_error(format!("no such tool: {other}")),
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        TOOL_NAMES.contains(&name)
    }
}

pub fn tool_defs() -> Vec<sa_domain::tool::ToolDefinition> {
    vec![
        sa_domain::tool::ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command, foreground or backgrounded after a yield timeout.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "background": {"type": "boolean"},
                    "yield_ms": {"type": "integer"},
                    "timeout_sec": {"type": "integer"},
                    "workdir": {"type": "string"},
                    "env": {"type": "object"}
                },
                "required": ["command"]
            }),
        },
        sa_domain::tool::ToolDefinition {
            name: "process".into(),
            description: "Manage a backgrounded exec session: list, poll, log, write, kill, clear, remove.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"]},
                    "session_id": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"},
                    "tail_lines": {"type": "integer"},
                    "data": {"type": "string"},
                    "eof": {"type": "boolean"}
                },
                "required": ["action"]
            }),
        },
    ]
}
