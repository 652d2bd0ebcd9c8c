//! MCP client for a UI-automation server over stdio.
//!
//! Speaks newline-delimited JSON-RPC 2.0 with a child process:
//! - `initialize` handshake followed by `notifications/initialized`
//! - `tools/call` for every capability invocation
//! - per-call timeout while waiting for the matching response id
//!
//! Stdout is read on a dedicated thread and forwarded over a channel, so a
//! silent server never blocks the caller past the configured timeout.

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{
    Arguments, CapabilityChannel, CapabilityError, CapabilityResult, ToolContent, ToolOutput,
};
use crate::config;

/// MCP protocol revision requested during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Configuration for the stdio MCP client
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Program to spawn
    pub command: String,
    /// Arguments for the program
    pub args: Vec<String>,
    /// Maximum wait for one response
    pub call_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            command: cfg.mcp.command.clone(),
            args: cfg.mcp.args.clone(),
            call_timeout: Duration::from_secs(cfg.mcp.call_timeout),
        }
    }
}

impl McpConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            ..Default::default()
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
    next_id: u64,
}

/// Stdio MCP client implementing [`CapabilityChannel`]
pub struct McpClient {
    config: McpConfig,
    connection: Option<Connection>,
}

impl McpClient {
    pub fn new(config: McpConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn spawn(&self) -> CapabilityResult<Connection> {
        let command_line = format!("{} {}", self.config.command, self.config.args.join(" "));
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CapabilityError::Spawn {
                command: command_line.trim().to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CapabilityError::Protocol("stdin was not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapabilityError::Protocol("stdout was not piped".into()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        Ok(Connection {
            child,
            stdin,
            lines: rx,
            next_id: 1,
        })
    }

    fn write_message(&mut self, message: &Value) -> CapabilityResult<()> {
        let conn = self.connection.as_mut().ok_or(CapabilityError::NotConnected)?;
        let mut line = serde_json::to_string(message)
            .map_err(|e| CapabilityError::Protocol(e.to_string()))?;
        line.push('\n');
        conn.stdin.write_all(line.as_bytes())?;
        conn.stdin.flush()?;
        Ok(())
    }

    fn notify(&mut self, method: &str, params: Value) -> CapabilityResult<()> {
        self.write_message(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }

    /// Send a request and wait for the response carrying the same id
    fn request(&mut self, method: &str, params: Value) -> CapabilityResult<Value> {
        let id = {
            let conn = self.connection.as_mut().ok_or(CapabilityError::NotConnected)?;
            let id = conn.next_id;
            conn.next_id += 1;
            id
        };

        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;

        let timeout = self.config.call_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CapabilityError::Timeout(timeout));
            }

            let received = match self.connection.as_ref() {
                Some(conn) => conn.lines.recv_timeout(remaining),
                None => return Err(CapabilityError::NotConnected),
            };

            let line = match received {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    self.drop_connection();
                    return Err(CapabilityError::Io(e));
                }
                Err(RecvTimeoutError::Timeout) => return Err(CapabilityError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    self.drop_connection();
                    return Err(CapabilityError::Disconnected);
                }
            };

            let message: Value = match serde_json::from_str(line.trim()) {
                Ok(value) => value,
                Err(_) => {
                    debug!(%line, "ignoring non-JSON line from automation backend");
                    continue;
                }
            };

            // Server-initiated request (e.g. ping): answer with an empty result
            if message.get("method").is_some() {
                if let Some(request_id) = message.get("id") {
                    let reply = json!({ "jsonrpc": "2.0", "id": request_id, "result": {} });
                    self.write_message(&reply)?;
                }
                continue;
            }

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(error) = message.get("error") {
                return Err(CapabilityError::Rpc {
                    code: error["code"].as_i64().unwrap_or(0),
                    message: error["message"].as_str().unwrap_or("unknown error").to_string(),
                });
            }

            return message
                .get("result")
                .cloned()
                .ok_or_else(|| CapabilityError::Protocol("response has no result".into()));
        }
    }

    fn drop_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            drop(conn.stdin);
            let _ = conn.child.kill();
            let _ = conn.child.wait();
        }
    }
}

impl CapabilityChannel for McpClient {
    fn connect(&mut self) -> CapabilityResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        self.connection = Some(self.spawn()?);

        let handshake = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .and_then(|_| self.notify("notifications/initialized", json!({})));

        if let Err(e) = handshake {
            self.drop_connection();
            return Err(e);
        }

        info!(command = %self.config.command, "connected to automation backend");
        Ok(())
    }

    fn invoke(&mut self, name: &str, args: Arguments) -> CapabilityResult<ToolOutput> {
        let result = self.request("tools/call", json!({ "name": name, "arguments": args }))?;
        Ok(parse_tool_output(&result))
    }

    fn disconnect(&mut self) {
        if self.connection.is_some() {
            self.drop_connection();
            info!("disconnected from automation backend");
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.drop_connection();
    }
}

/// Convert a `tools/call` result into [`ToolOutput`], skipping unknown content kinds
pub fn parse_tool_output(result: &Value) -> ToolOutput {
    let mut content = Vec::new();

    for item in result["content"].as_array().into_iter().flatten() {
        match item["type"].as_str() {
            Some("text") => content.push(ToolContent::text(item["text"].as_str().unwrap_or(""))),
            Some("image") => match item["data"].as_str() {
                Some(data) => content.push(ToolContent::Image {
                    data: data.to_string(),
                    media_type: item["mimeType"].as_str().map(str::to_string),
                }),
                None => warn!("image content without data"),
            },
            other => debug!(kind = ?other, "skipping unsupported content"),
        }
    }

    ToolOutput {
        content,
        is_error: result["isError"].as_bool().unwrap_or(false),
    }
}
