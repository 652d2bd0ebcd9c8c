//! Capability declarations offered to the model.

use serde::Serialize;
use serde_json::{Value, json};

pub const UI_TAP: &str = "ui_tap";
pub const UI_SWIPE: &str = "ui_swipe";
pub const UI_TYPE: &str = "ui_type";
pub const UI_DESCRIBE_ALL: &str = "ui_describe_all";
pub const UI_VIEW: &str = "ui_view";
pub const SCREENSHOT: &str = "screenshot";
pub const OPEN_SIMULATOR: &str = "open_simulator";
pub const LAUNCH_APP: &str = "launch_app";

/// Sentinel the agent calls to end a step
pub const STEP_COMPLETE: &str = "step_complete";

/// Argument carrying the target device identifier
pub const DEVICE_ID_ARG: &str = "udid";

/// A capability the model may invoke
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn declare(name: &'static str, description: &'static str, input_schema: Value) -> ToolDeclaration {
    ToolDeclaration {
        name,
        description,
        input_schema,
    }
}

fn no_arguments() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

/// The fixed declaration set sent with every model request
pub fn simulator_tools() -> Vec<ToolDeclaration> {
    vec![
        declare(
            UI_TAP,
            "Tap the simulator screen at the given coordinates. Use it for buttons, icons, \
             and any other interactive element.",
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "number", "description": "X coordinate to tap" },
                    "y": { "type": "number", "description": "Y coordinate to tap" },
                    "duration": {
                        "type": "string",
                        "description": "Optional press duration in seconds, e.g. '0.5' for a long press"
                    }
                },
                "required": ["x", "y"]
            }),
        ),
        declare(
            UI_SWIPE,
            "Swipe across the simulator screen to scroll content or trigger swipe actions.",
            json!({
                "type": "object",
                "properties": {
                    "x_start": { "type": "number", "description": "Starting X coordinate" },
                    "y_start": { "type": "number", "description": "Starting Y coordinate" },
                    "x_end": { "type": "number", "description": "Ending X coordinate" },
                    "y_end": { "type": "number", "description": "Ending Y coordinate" },
                    "duration": {
                        "type": "string",
                        "description": "Swipe duration in seconds (default 0.5)"
                    }
                },
                "required": ["x_start", "y_start", "x_end", "y_end"]
            }),
        ),
        declare(
            UI_TYPE,
            "Type text into the focused field. Focus the field with a tap first. ASCII \
             printable characters only.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to type" }
                },
                "required": ["text"]
            }),
        ),
        declare(
            UI_DESCRIBE_ALL,
            "List accessibility information (labels, types, frames) for every element on \
             screen. Useful for exact tap coordinates.",
            no_arguments(),
        ),
        declare(
            UI_VIEW,
            "Capture a compressed image of the current screen to see what is visible and \
             verify that actions worked.",
            no_arguments(),
        ),
        declare(
            SCREENSHOT,
            "Save a full-quality screenshot to a file.",
            json!({
                "type": "object",
                "properties": {
                    "output_path": { "type": "string", "description": "File path to write" },
                    "type": {
                        "type": "string",
                        "enum": ["png", "jpeg", "tiff", "bmp", "gif"],
                        "description": "Image format (default png)"
                    }
                },
                "required": ["output_path"]
            }),
        ),
        declare(
            OPEN_SIMULATOR,
            "Open the Simulator application if it is not already running.",
            no_arguments(),
        ),
        declare(
            LAUNCH_APP,
            "Launch an app by bundle identifier.",
            json!({
                "type": "object",
                "properties": {
                    "bundle_id": {
                        "type": "string",
                        "description": "Bundle identifier, e.g. com.apple.Preferences"
                    },
                    "terminate_running": {
                        "type": "boolean",
                        "description": "Kill a running instance before launching (default false)"
                    }
                },
                "required": ["bundle_id"]
            }),
        ),
        declare(
            STEP_COMPLETE,
            "Signal that the current step is finished. Call it once the goal is reached, or \
             when you conclude the goal cannot be reached.",
            json!({
                "type": "object",
                "properties": {
                    "success": {
                        "type": "boolean",
                        "description": "Whether the goal was reached"
                    },
                    "summary": {
                        "type": "string",
                        "description": "What was accomplished, or why it failed"
                    }
                },
                "required": ["success", "summary"]
            }),
        ),
    ]
}

/// Image format argument for the screenshot capability, from the file extension
pub fn screenshot_format(filename: &str) -> &'static str {
    let extension = std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "jpeg",
        "tif" | "tiff" => "tiff",
        "bmp" => "bmp",
        "gif" => "gif",
        _ => "png",
    }
}
