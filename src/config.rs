//! Configuration management with environment variable support.
//!
//! Centralized settings for the model client, the automation backend, and
//! device preparation timing. Every value has a compiled-in default and can
//! be overridden through the environment.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SHOTTER_MODEL_ENDPOINT` | Messages API URL | `https://api.anthropic.com/v1/messages` |
//! | `SHOTTER_MODEL` | Model name | `claude-sonnet-4-20250514` |
//! | `SHOTTER_MAX_TOKENS` | Maximum tokens per model reply | `4096` |
//! | `SHOTTER_MODEL_CONNECT_TIMEOUT` | Model connection timeout (seconds) | `10` |
//! | `SHOTTER_MODEL_READ_TIMEOUT` | Model read timeout (seconds) | `300` |
//! | `ANTHROPIC_API_KEY` | API key for the model endpoint | - |
//! | `SHOTTER_MCP_COMMAND` | Automation backend command | `npx` |
//! | `SHOTTER_MCP_ARGS` | Automation backend arguments | `-y ios-simulator-mcp` |
//! | `SHOTTER_MCP_CALL_TIMEOUT` | Per-capability-call timeout (seconds) | `120` |
//! | `SHOTTER_BOOT_SETTLE_MS` | Delay after booting a device (ms) | `3000` |
//! | `SHOTTER_LAUNCH_SETTLE_MS` | Delay after launching the app (ms) | `2000` |
//! | `SHOTTER_READY_SETTLE_MS` | Delay after the pre-run ready signal (ms) | `2000` |
//! | `SHOTTER_READY_TIMEOUT` | Pre-run readiness ceiling (seconds) | `300` |
//! | `SHOTTER_SHELL` | Shell used for the pre-run command | `/bin/bash` |
//!
//! # Example
//!
//! ```bash
//! # Point the agent at a proxy and a different model
//! export SHOTTER_MODEL_ENDPOINT="http://localhost:8787/v1/messages"
//! export SHOTTER_MODEL="claude-opus-4-20250514"
//!
//! # Use a locally installed automation server
//! export SHOTTER_MCP_COMMAND="ios-simulator-mcp"
//! export SHOTTER_MCP_ARGS=""
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default Messages API endpoint
pub const DEFAULT_MODEL_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Default model name
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default max tokens per model reply
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default model connection timeout (seconds)
pub const DEFAULT_MODEL_CONNECT_TIMEOUT: u64 = 10;

/// Default model read timeout (seconds)
pub const DEFAULT_MODEL_READ_TIMEOUT: u64 = 300;

/// Default automation backend command
pub const DEFAULT_MCP_COMMAND: &str = "npx";

/// Default automation backend arguments
pub const DEFAULT_MCP_ARGS: &str = "-y ios-simulator-mcp";

/// Default per-call capability timeout (seconds)
pub const DEFAULT_MCP_CALL_TIMEOUT: u64 = 120;

/// Default settle delay after boot (milliseconds)
pub const DEFAULT_BOOT_SETTLE_MS: u64 = 3000;

/// Default settle delay after app launch (milliseconds)
pub const DEFAULT_LAUNCH_SETTLE_MS: u64 = 2000;

/// Default settle delay after the ready signal (milliseconds)
pub const DEFAULT_READY_SETTLE_MS: u64 = 2000;

/// Default readiness ceiling for the pre-run command (seconds)
pub const DEFAULT_READY_TIMEOUT: u64 = 5 * 60;

/// Default shell for the pre-run command
pub const DEFAULT_SHELL: &str = "/bin/bash";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_MODEL_ENDPOINT: &str = "SHOTTER_MODEL_ENDPOINT";
pub const ENV_MODEL: &str = "SHOTTER_MODEL";
pub const ENV_MAX_TOKENS: &str = "SHOTTER_MAX_TOKENS";
pub const ENV_MODEL_CONNECT_TIMEOUT: &str = "SHOTTER_MODEL_CONNECT_TIMEOUT";
pub const ENV_MODEL_READ_TIMEOUT: &str = "SHOTTER_MODEL_READ_TIMEOUT";

/// API key variable read by the model client
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";

pub const ENV_MCP_COMMAND: &str = "SHOTTER_MCP_COMMAND";
pub const ENV_MCP_ARGS: &str = "SHOTTER_MCP_ARGS";
pub const ENV_MCP_CALL_TIMEOUT: &str = "SHOTTER_MCP_CALL_TIMEOUT";

pub const ENV_BOOT_SETTLE_MS: &str = "SHOTTER_BOOT_SETTLE_MS";
pub const ENV_LAUNCH_SETTLE_MS: &str = "SHOTTER_LAUNCH_SETTLE_MS";
pub const ENV_READY_SETTLE_MS: &str = "SHOTTER_READY_SETTLE_MS";
pub const ENV_READY_TIMEOUT: &str = "SHOTTER_READY_TIMEOUT";
pub const ENV_SHELL: &str = "SHOTTER_SHELL";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Model client settings
    pub model: ModelSettings,
    /// Automation backend settings
    pub mcp: McpSettings,
    /// Device preparation timing
    pub timing: TimingSettings,
}

/// Model-related settings
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Messages API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in a reply
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Read timeout (seconds)
    pub read_timeout: u64,
}

/// Automation backend settings
#[derive(Debug, Clone)]
pub struct McpSettings {
    /// Program to spawn
    pub command: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Timeout for a single capability call (seconds)
    pub call_timeout: u64,
}

/// Settle delays and pre-run supervision settings
#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub boot_settle_ms: u64,
    pub launch_settle_ms: u64,
    pub ready_settle_ms: u64,
    /// Readiness ceiling for the pre-run command (seconds)
    pub ready_timeout: u64,
    /// Shell used to run the pre-run command
    pub shell: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            model: ModelSettings::from_env(),
            mcp: McpSettings::from_env(),
            timing: TimingSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            model: ModelSettings::defaults(),
            mcp: McpSettings::defaults(),
            timing: TimingSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ModelSettings {
    /// Create model settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_MODEL_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_MODEL_ENDPOINT.to_string()),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: env_parse(ENV_MAX_TOKENS).unwrap_or(DEFAULT_MAX_TOKENS),
            connect_timeout: env_parse(ENV_MODEL_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_MODEL_CONNECT_TIMEOUT),
            read_timeout: env_parse(ENV_MODEL_READ_TIMEOUT).unwrap_or(DEFAULT_MODEL_READ_TIMEOUT),
        }
    }

    /// Create model settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            connect_timeout: DEFAULT_MODEL_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_MODEL_READ_TIMEOUT,
        }
    }
}

impl McpSettings {
    /// Create backend settings from environment variables
    pub fn from_env() -> Self {
        let args = env::var(ENV_MCP_ARGS).unwrap_or_else(|_| DEFAULT_MCP_ARGS.to_string());
        Self {
            command: env::var(ENV_MCP_COMMAND).unwrap_or_else(|_| DEFAULT_MCP_COMMAND.to_string()),
            args: split_args(&args),
            call_timeout: env_parse(ENV_MCP_CALL_TIMEOUT).unwrap_or(DEFAULT_MCP_CALL_TIMEOUT),
        }
    }

    /// Create backend settings with defaults
    pub fn defaults() -> Self {
        Self {
            command: DEFAULT_MCP_COMMAND.to_string(),
            args: split_args(DEFAULT_MCP_ARGS),
            call_timeout: DEFAULT_MCP_CALL_TIMEOUT,
        }
    }
}

impl TimingSettings {
    /// Create timing settings from environment variables
    pub fn from_env() -> Self {
        Self {
            boot_settle_ms: env_parse(ENV_BOOT_SETTLE_MS).unwrap_or(DEFAULT_BOOT_SETTLE_MS),
            launch_settle_ms: env_parse(ENV_LAUNCH_SETTLE_MS).unwrap_or(DEFAULT_LAUNCH_SETTLE_MS),
            ready_settle_ms: env_parse(ENV_READY_SETTLE_MS).unwrap_or(DEFAULT_READY_SETTLE_MS),
            ready_timeout: env_parse(ENV_READY_TIMEOUT).unwrap_or(DEFAULT_READY_TIMEOUT),
            shell: env::var(ENV_SHELL).unwrap_or_else(|_| DEFAULT_SHELL.to_string()),
        }
    }

    /// Create timing settings with defaults
    pub fn defaults() -> Self {
        Self {
            boot_settle_ms: DEFAULT_BOOT_SETTLE_MS,
            launch_settle_ms: DEFAULT_LAUNCH_SETTLE_MS,
            ready_settle_ms: DEFAULT_READY_SETTLE_MS,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Split a whitespace-separated argument string
fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Get the API key from the environment (convenience function)
pub fn api_key() -> Option<String> {
    env::var(ENV_API_KEY).ok().filter(|key| !key.trim().is_empty())
}
