use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-step iteration budget
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Default per-step timeout (milliseconds)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Default root directory for captured screenshots
pub const DEFAULT_OUTPUT_DIR: &str = "./screenshots";

/// One navigation goal within a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Free-text goal the agent must reach
    pub goal: String,

    /// Advisory hints rendered into the step prompt
    #[serde(default)]
    pub hints: Vec<String>,

    /// Screenshot filename saved once the goal is reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl StepSpec {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            hints: Vec::new(),
            screenshot: None,
        }
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn screenshot(mut self, filename: impl Into<String>) -> Self {
        self.screenshot = Some(filename.into());
        self
    }
}

/// A loaded, validated workflow
///
/// Immutable once loaded; the coordinator only ever borrows it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSpec {
    pub name: String,

    pub description: Option<String>,

    /// Bundle identifier of the app under test
    pub bundle_id: String,

    /// Device names, resolved against the available simulators at run time
    pub devices: Vec<String>,

    /// Shell command started before the steps run on each device
    pub run_before: Option<String>,

    /// Model round-trips allowed per step
    pub max_iterations: u32,

    /// Declared per-step timeout (not enforced as wall clock)
    pub step_timeout: Duration,

    /// Root under which each device gets its own screenshot directory
    pub output_dir: PathBuf,

    pub steps: Vec<StepSpec>,
}

impl WorkflowSpec {
    /// Create a workflow with default limits and no steps
    pub fn new(name: impl Into<String>, bundle_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            bundle_id: bundle_id.into(),
            devices: Vec::new(),
            run_before: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step_timeout: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            steps: Vec::new(),
        }
    }

    pub fn device(mut self, name: impl Into<String>) -> Self {
        self.devices.push(name.into());
        self
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn run_before(mut self, command: impl Into<String>) -> Self {
        self.run_before = Some(command.into());
        self
    }
}

/// Result type for workflow loading
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors raised while loading a workflow file
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("workflow file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid workflow: {0}")]
    Invalid(String),
}
