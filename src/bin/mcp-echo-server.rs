//! `mcp-echo-server` — a minimal stdio MCP server.
//!
//! Serves a handful of tools (`echo`, `sum`, `hang`, `crash`, `fail`,
//! `add_tool`), one resource and one prompt. Used by the integration tests and
//! handy as a fleet member when trying out a configuration.
//!
//! Environment:
//! - `MCP_ECHO_PID_LOG`: append this process's pid to the file on start
//! - `MCP_ECHO_BANNER`: print a non-JSON banner line on stdout before serving

use std::io::Write as _;

use mcp_fleet::mcp_client::types::error_codes::{INVALID_PARAMS, METHOD_NOT_FOUND};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

const RESOURCE_URI: &str = "mem://greeting";

struct EchoServer {
    tools: Vec<Value>,
    stdout: Stdout,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("MCP_ECHO_PID_LOG") {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", std::process::id())?;
    }

    let mut server = EchoServer {
        tools: base_tools(),
        stdout: tokio::io::stdout(),
    };

    if std::env::var_os("MCP_ECHO_BANNER").is_some() {
        server.write_raw("Starting echo server on stdio...").await?;
    }
    eprintln!("mcp-echo-server {} ready", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                eprintln!("ignoring malformed line: {e}");
                continue;
            }
        };
        server.handle(message).await?;
    }

    // Stdin closed: the client asked us to stop.
    Ok(())
}

impl EchoServer {
    async fn handle(&mut self, message: Value) -> anyhow::Result<()> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            // Responses to requests we never send.
            return Ok(());
        };
        let Some(id) = message.get("id").cloned() else {
            // Notifications need no reply.
            return Ok(());
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let reply = match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {"listChanged": true},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {"name": "mcp-echo-server", "version": env!("CARGO_PKG_VERSION")}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => match self.call_tool(&params).await? {
                Some(result) => result,
                None => return Ok(()),
            },
            "resources/list" => Ok(json!({
                "resources": [{
                    "uri": RESOURCE_URI,
                    "name": "greeting",
                    "description": "A friendly greeting",
                    "mimeType": "text/plain"
                }]
            })),
            "resources/read" => match params.get("uri").and_then(Value::as_str) {
                Some(RESOURCE_URI) => Ok(json!({
                    "contents": [{
                        "uri": RESOURCE_URI,
                        "mimeType": "text/plain",
                        "text": "hello from mcp-echo-server"
                    }]
                })),
                other => Err((INVALID_PARAMS, format!("unknown resource: {other:?}"))),
            },
            "prompts/list" => Ok(json!({
                "prompts": [{
                    "name": "greet",
                    "description": "Greet someone by name",
                    "arguments": [{"name": "name", "required": true}]
                }]
            })),
            "prompts/get" => {
                let name = params
                    .pointer("/arguments/name")
                    .and_then(Value::as_str)
                    .unwrap_or("world");
                Ok(json!({
                    "description": "Greeting",
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Say hello to {name}.")}
                    }]
                }))
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        let response = match reply {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message}
            }),
        };
        self.write(&response).await
    }

    /// `None` means no response is sent.
    async fn call_tool(
        &mut self,
        params: &Value,
    ) -> anyhow::Result<Option<Result<Value, (i64, String)>>> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = match name {
            "echo" => {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                json!({"content": [{"type": "text", "text": text}]})
            }
            "sum" => {
                let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                let total = a + b;
                if total.fract() == 0.0 {
                    json!({"content": total as i64})
                } else {
                    json!({"content": total})
                }
            }
            "fail" => json!({
                "content": [{"type": "text", "text": "this tool always fails"}],
                "isError": true
            }),
            "hang" => return Ok(None),
            "crash" => {
                eprintln!("crash requested, exiting with code 1");
                std::process::exit(1);
            }
            "add_tool" => {
                if !self.tools.iter().any(|t| t["name"] == "extra") {
                    self.tools.push(json!({
                        "name": "extra",
                        "description": "Added at runtime",
                        "inputSchema": {"type": "object"}
                    }));
                    self.write(&json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/tools/list_changed"
                    }))
                    .await?;
                }
                json!({"content": [{"type": "text", "text": "added"}]})
            }
            "extra" if self.tools.iter().any(|t| t["name"] == "extra") => {
                json!({"content": [{"type": "text", "text": "extra"}]})
            }
            other => return Ok(Some(Err((INVALID_PARAMS, format!("unknown tool: {other}"))))),
        };
        Ok(Some(Ok(result)))
    }

    async fn write(&mut self, message: &Value) -> anyhow::Result<()> {
        self.write_raw(&message.to_string()).await
    }

    async fn write_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }
}

fn base_tools() -> Vec<Value> {
    let object = |properties: Value| json!({"type": "object", "properties": properties});
    vec![
        json!({
            "name": "echo",
            "description": "Echo the given text",
            "inputSchema": object(json!({"text": {"type": "string"}}))
        }),
        json!({
            "name": "sum",
            "description": "Add two numbers",
            "inputSchema": object(json!({"a": {"type": "number"}, "b": {"type": "number"}}))
        }),
        json!({
            "name": "hang",
            "description": "Never responds",
            "inputSchema": object(json!({}))
        }),
        json!({
            "name": "crash",
            "description": "Exit the server with code 1",
            "inputSchema": object(json!({}))
        }),
        json!({
            "name": "fail",
            "description": "Return an error-flagged result",
            "inputSchema": object(json!({}))
        }),
        json!({
            "name": "add_tool",
            "description": "Register the `extra` tool and announce the change",
            "inputSchema": object(json!({}))
        }),
    ]
}
