//! Shotter - model-driven iOS simulator navigation with resumable screenshots.
//!
//! A workflow is an ordered list of navigation goals applied to a set of
//! simulators. For every step a reasoning model looks at the screen and
//! drives UI capabilities (tap, swipe, type) until it calls `step_complete`;
//! steps that declare a screenshot save it as proof. Re-running a workflow
//! skips every step whose screenshot already exists, up to the first gap.
//!
//! This crate provides:
//! - Workflow loading from YAML with `${VAR}` expansion
//! - A bounded per-step agent loop ([`StepExecutor`])
//! - Device preparation, pre-run command supervision, and resume detection ([`DeviceRunner`])
//! - Multi-device coordination with a single shared capability channel ([`WorkflowCoordinator`])
//! - An MCP stdio client and a Messages API client for the real collaborators
//! - An MCP server mode exposing device selection and the UI tools to interactive clients ([`ShotterServer`])
//!
//! # Example
//!
//! ```rust,no_run
//! use shotter::capability::{McpClient, McpConfig};
//! use shotter::model::{AnthropicClient, AnthropicConfig};
//! use shotter::simulator::Simctl;
//! use shotter::{WorkflowCoordinator, load_workflow};
//!
//! let workflow = load_workflow("workflows/settings-tour.yaml").unwrap();
//! let mut coordinator = WorkflowCoordinator::new(
//!     Simctl::new(),
//!     McpClient::new(McpConfig::default()),
//!     AnthropicClient::new(AnthropicConfig::default()),
//! );
//! let result = coordinator.run(&workflow);
//! println!("success: {}", result.success);
//! ```

pub mod agent;
pub mod capability;
pub mod config;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod runner;
pub mod server;
pub mod session;
pub mod simulator;
pub mod workflow;

// Re-export the agent loop
pub use agent::StepExecutor;

// Re-export collaborator seams
pub use capability::{CapabilityChannel, CapabilityError, ToolContent, ToolOutput};
pub use model::{ModelChannel, ModelError, ModelReply};
pub use simulator::{Device, DeviceControl, DeviceError};

// Re-export orchestration
pub use orchestrator::{DeviceRunner, ReadinessError, RunSettings, WorkflowCoordinator};

// Re-export server mode
pub use server::ShotterServer;

// Re-export results and session context
pub use runner::{DeviceResult, FirstFailure, StepResult, WorkflowResult};
pub use session::DeviceSession;

// Re-export workflow loading
pub use workflow::{LoadError, StepSpec, WorkflowSpec, load_workflow, parse_workflow};
