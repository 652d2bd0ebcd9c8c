//! MCP server mode for interactive clients.
//!
//! Serves newline-delimited JSON-RPC 2.0 on stdio:
//! - device discovery and selection (`list_devices`, `select_device`)
//! - the simulator capabilities, forwarded to the automation backend for the
//!   selected device
//! - workflow inspection (`load_workflow`, `list_workflows`)
//! - the `navigate` and `workflow-step` prompts
//!
//! The selected device lives in a [`DeviceSession`] owned by the server
//! instance, so every forwarded call is targeted explicitly.

use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::capability::mcp::PROTOCOL_VERSION;
use crate::capability::tools::{
    LAUNCH_APP, SCREENSHOT, UI_DESCRIBE_ALL, UI_SWIPE, UI_TAP, UI_TYPE, UI_VIEW,
};
use crate::capability::{
    Arguments, CapabilityChannel, CapabilityResult, ToolDeclaration, ToolOutput, simulator_tools,
};
use crate::model::prompts::{navigate_prompt, workflow_step_prompt};
use crate::session::DeviceSession;
use crate::simulator::{DeviceControl, find_device};
use crate::workflow::load_workflow;
use crate::workflow::types::DEFAULT_OUTPUT_DIR;

pub const LIST_DEVICES: &str = "list_devices";
pub const SELECT_DEVICE: &str = "select_device";
pub const LOAD_WORKFLOW: &str = "load_workflow";
pub const LIST_WORKFLOWS: &str = "list_workflows";

pub const NAVIGATE_PROMPT: &str = "navigate";
pub const WORKFLOW_STEP_PROMPT: &str = "workflow-step";

/// Directory searched by `list_workflows` when none is given
pub const DEFAULT_WORKFLOWS_DIR: &str = "./workflows";

/// Capabilities forwarded to the automation backend
const FORWARDED: [&str; 7] = [
    LAUNCH_APP,
    UI_VIEW,
    UI_DESCRIBE_ALL,
    UI_TAP,
    UI_SWIPE,
    UI_TYPE,
    SCREENSHOT,
];

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Stdio MCP server over a device controller and an automation backend
pub struct ShotterServer<D, C> {
    devices: D,
    capabilities: C,
    output_root: PathBuf,
    session: Option<DeviceSession>,
    connected: bool,
}

impl<D: DeviceControl, C: CapabilityChannel> ShotterServer<D, C> {
    pub fn new(devices: D, capabilities: C) -> Self {
        Self {
            devices,
            capabilities,
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            session: None,
            connected: false,
        }
    }

    /// Root for the selected device's session directory
    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_root = dir.into();
        self
    }

    /// The selected device, if any
    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    /// Answer requests from `input` until it closes, then release the backend
    pub fn serve(&mut self, input: impl BufRead, mut output: impl Write) -> io::Result<()> {
        info!("serving MCP on stdio");
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle_line(&line) {
                let mut text = reply.to_string();
                text.push('\n');
                output.write_all(text.as_bytes())?;
                output.flush()?;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Disconnect the automation backend if it was connected
    pub fn shutdown(&mut self) {
        if self.connected {
            self.capabilities.disconnect();
            self.connected = false;
        }
    }

    /// Handle one raw line; `None` when no reply is due
    pub fn handle_line(&mut self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(message) => self.handle(&message),
            Err(e) => Some(error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {}", e))),
        }
    }

    /// Handle one decoded message; notifications and responses get no reply
    pub fn handle(&mut self, message: &Value) -> Option<Value> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            debug!("ignoring message without a method");
            return None;
        };
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        debug!(method, "request");

        let outcome = self.dispatch(method, &params);
        let id = message.get("id")?.clone();

        Some(match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(e) => error_response(id, e.code, &e.message),
        })
    }

    fn dispatch(&mut self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION),
                "capabilities": { "tools": {}, "prompts": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools: Vec<Value> = server_tools().iter().map(declaration_json).collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
                let args = params
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let output = self.call_tool(name, args);
                serde_json::to_value(output).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
            }
            "prompts/list" => Ok(json!({ "prompts": prompt_list() })),
            "prompts/get" => get_prompt(params),
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }

    /// Run one tool. Failures are reported as error-flagged output.
    pub fn call_tool(&mut self, name: &str, args: Arguments) -> ToolOutput {
        let text_arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);

        match name {
            LIST_DEVICES => self.list_devices(text_arg("filter").as_deref()),
            SELECT_DEVICE => match text_arg("device") {
                Some(pattern) => self.select_device(&pattern),
                None => ToolOutput::error("Missing required argument: device"),
            },
            LOAD_WORKFLOW => match text_arg("workflow_path") {
                Some(path) => describe_workflow(Path::new(&path)),
                None => ToolOutput::error("Missing required argument: workflow_path"),
            },
            LIST_WORKFLOWS => {
                let dir = text_arg("directory").unwrap_or_else(|| DEFAULT_WORKFLOWS_DIR.to_string());
                list_workflows(Path::new(&dir))
            }
            forwarded if FORWARDED.contains(&forwarded) => self.forward(forwarded, args),
            unknown => ToolOutput::error(format!("Unknown tool: {}", unknown)),
        }
    }

    fn list_devices(&self, filter: Option<&str>) -> ToolOutput {
        let devices = match self.devices.list() {
            Ok(devices) => devices,
            Err(e) => return ToolOutput::error(format!("Failed to list devices: {}", e)),
        };

        let needle = filter.map(str::to_lowercase);
        let matching: Vec<_> = devices
            .iter()
            .filter(|d| match &needle {
                Some(needle) => d.name.to_lowercase().contains(needle),
                None => true,
            })
            .collect();

        if matching.is_empty() {
            return ToolOutput::text(match filter {
                Some(filter) => format!("No devices found matching \"{}\"", filter),
                None => "No iOS simulators found.".to_string(),
            });
        }

        let lines: Vec<String> = matching
            .iter()
            .map(|d| format!("- {} ({}) [{}]\n  UDID: {}", d.name, d.runtime, d.state, d.udid))
            .collect();
        ToolOutput::text(format!("Available iOS Simulators:\n{}", lines.join("\n")))
    }

    fn select_device(&mut self, pattern: &str) -> ToolOutput {
        let devices = match self.devices.list() {
            Ok(devices) => devices,
            Err(e) => return ToolOutput::error(format!("Failed to list devices: {}", e)),
        };

        let Some(device) = find_device(&devices, pattern) else {
            let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
            return ToolOutput::error(format!(
                "Device not found: \"{}\"\nAvailable: {}",
                pattern,
                names.join(", ")
            ));
        };

        if let Err(e) = self.devices.boot(&device.udid) {
            return ToolOutput::error(format!("Failed to boot {}: {}", device.name, e));
        }
        if let Err(e) = self.devices.open() {
            warn!(error = %e, "failed to bring the simulator to the foreground");
        }

        info!(device = %device.name, udid = %device.udid, "device selected");
        self.session = Some(DeviceSession::new(
            &self.output_root,
            &device.name,
            Some(device.udid.clone()),
        ));

        if let Err(e) = self.ensure_connected() {
            return ToolOutput::error(format!(
                "Selected {} but the automation backend is unavailable: {}",
                device.name, e
            ));
        }

        ToolOutput::text(format!(
            "Selected and booted: {} ({})\nUDID: {}",
            device.name, device.runtime, device.udid
        ))
    }

    fn forward(&mut self, name: &str, args: Arguments) -> ToolOutput {
        let args = match &self.session {
            Some(session) => session.target(args),
            None => return ToolOutput::error("No device selected. Use select_device first."),
        };

        let result = self
            .ensure_connected()
            .and_then(|_| self.capabilities.invoke(name, args));
        match result {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = name, error = %e, "forwarded call failed");
                ToolOutput::error(format!("Error calling {}: {}", name, e))
            }
        }
    }

    fn ensure_connected(&mut self) -> CapabilityResult<()> {
        if !self.connected {
            self.capabilities.connect()?;
            self.connected = true;
        }
        Ok(())
    }
}

/// Tools offered in server mode
pub fn server_tools() -> Vec<ToolDeclaration> {
    let mut tools = vec![
        ToolDeclaration {
            name: LIST_DEVICES,
            description: "List available iOS simulators with their names, UDIDs, states, and runtimes.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filter": {
                        "type": "string",
                        "description": "Case-insensitive substring of the device name"
                    }
                }
            }),
        },
        ToolDeclaration {
            name: SELECT_DEVICE,
            description: "Boot a simulator and make it the target of every UI command. \
                          Device names are matched loosely.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "device": {
                        "type": "string",
                        "description": "Device name or pattern, e.g. 'iPhone 16 Pro' or 'iPad'"
                    }
                },
                "required": ["device"]
            }),
        },
    ];

    tools.extend(
        simulator_tools()
            .into_iter()
            .filter(|tool| FORWARDED.contains(&tool.name)),
    );

    tools.push(ToolDeclaration {
        name: LOAD_WORKFLOW,
        description: "Load a workflow YAML file and describe its devices and steps.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "workflow_path": { "type": "string", "description": "Path to the workflow file" }
            },
            "required": ["workflow_path"]
        }),
    });
    tools.push(ToolDeclaration {
        name: LIST_WORKFLOWS,
        description: "List workflow YAML files in a directory.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "Directory to search (default ./workflows)"
                }
            }
        }),
    });
    tools
}

fn declaration_json(tool: &ToolDeclaration) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": tool.input_schema,
    })
}

fn describe_workflow(path: &Path) -> ToolOutput {
    let spec = match load_workflow(path) {
        Ok(spec) => spec,
        Err(e) => return ToolOutput::error(format!("Error loading workflow: {}", e)),
    };

    let mut text = format!("Workflow: {}\n", spec.name);
    if let Some(description) = &spec.description {
        text.push_str(&format!("Description: {}\n", description));
    }
    text.push_str(&format!("Bundle ID: {}\n", spec.bundle_id));
    text.push_str(&format!("Devices: {}\n", spec.devices.join(", ")));
    text.push_str(&format!("Output Directory: {}\n", spec.output_dir.display()));
    text.push_str("\nSteps:");
    for (i, step) in spec.steps.iter().enumerate() {
        match &step.screenshot {
            Some(file) => text.push_str(&format!("\n{}. {} -> {}", i + 1, step.goal, file)),
            None => text.push_str(&format!("\n{}. {}", i + 1, step.goal)),
        }
    }
    ToolOutput::text(text)
}

fn list_workflows(dir: &Path) -> ToolOutput {
    if !dir.is_dir() {
        return ToolOutput::error(format!("Directory not found: {}", dir.display()));
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => return ToolOutput::error(format!("Failed to read {}: {}", dir.display(), e)),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return ToolOutput::text(format!("No workflow files found in {}", dir.display()));
    }

    let lines: Vec<String> = files
        .iter()
        .map(|path| {
            let file = path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default();
            match load_workflow(path) {
                Ok(spec) => format!(
                    "- {}: {} ({} device(s), {} step(s))",
                    file,
                    spec.name,
                    spec.devices.len(),
                    spec.steps.len()
                ),
                Err(_) => format!("- {}: (parse error)", file),
            }
        })
        .collect();
    ToolOutput::text(format!("Workflows in {}:\n{}", dir.display(), lines.join("\n")))
}

fn prompt_list() -> Value {
    json!([
        {
            "name": NAVIGATE_PROMPT,
            "description": "Guide to navigating the iOS Simulator with the UI tools.",
            "arguments": []
        },
        {
            "name": WORKFLOW_STEP_PROMPT,
            "description": "Format a workflow step goal and its hints for execution.",
            "arguments": [
                { "name": "goal", "description": "The goal to achieve", "required": true },
                { "name": "hints", "description": "Optional comma-separated hints", "required": false }
            ]
        }
    ])
}

fn get_prompt(params: &Value) -> Result<Value, RpcError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments");
    let arg = |key: &str| args.and_then(|a| a.get(key)).and_then(Value::as_str);

    let text = match name {
        NAVIGATE_PROMPT => navigate_prompt(),
        WORKFLOW_STEP_PROMPT => {
            let goal = arg("goal")
                .ok_or_else(|| RpcError::new(INVALID_PARAMS, "workflow-step requires a goal"))?;
            let hints: Vec<String> = arg("hints")
                .map(|hints| {
                    hints
                        .split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            workflow_step_prompt(goal, &hints)
        }
        other => {
            return Err(RpcError::new(INVALID_PARAMS, format!("Unknown prompt: {}", other)));
        }
    };

    Ok(json!({
        "messages": [
            { "role": "user", "content": { "type": "text", "text": text } }
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_tools_forward_simulator_capabilities() {
        let tools = server_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 11);
        for name in FORWARDED {
            assert!(names.contains(&name), "{}", name);
        }
        assert!(!names.contains(&crate::capability::STEP_COMPLETE));
    }

    #[test]
    fn test_workflow_step_prompt_splits_hints() {
        let reply = get_prompt(&json!({
            "name": "workflow-step",
            "arguments": { "goal": "Open Settings", "hints": "Gear icon, second page,," }
        }))
        .ok()
        .unwrap();
        let text = reply["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("Open Settings"));
        assert!(text.contains("- Gear icon\n- second page\n"));
    }

    #[test]
    fn test_unknown_prompt_is_invalid_params() {
        let err = get_prompt(&json!({ "name": "nope" })).err().unwrap();
        assert_eq!(err.code, INVALID_PARAMS);
        let err = get_prompt(&json!({ "name": "workflow-step" })).err().unwrap();
        assert_eq!(err.code, INVALID_PARAMS);
    }
}
