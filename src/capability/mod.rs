pub mod mcp;
pub mod tools;
pub mod types;

pub use mcp::{McpClient, McpConfig, parse_tool_output};
pub use tools::{STEP_COMPLETE, ToolDeclaration, simulator_tools};
pub use types::{
    Arguments, CapabilityChannel, CapabilityError, CapabilityResult, ToolContent, ToolOutput,
};
