//! Result records for steps, devices, and whole workflow runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::workflow::StepSpec;

/// Outcome of one executed (or resumed) step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step this result belongs to
    pub step: StepSpec,

    /// Whether the agent reported the goal as reached
    pub success: bool,

    /// Absolute path of the saved screenshot, if one was produced
    pub screenshot_path: Option<PathBuf>,

    /// Failure reason
    pub error: Option<String>,

    /// Model round-trips consumed (0 for resumed steps)
    pub iterations: u32,

    /// Distinct capability names invoked, in first-use order
    pub tools_used: Vec<String>,
}

impl StepResult {
    /// Synthetic result for a step satisfied by an existing artifact
    pub fn resumed(step: &StepSpec, screenshot_path: Option<PathBuf>) -> Self {
        Self {
            step: step.clone(),
            success: true,
            screenshot_path,
            error: None,
            iterations: 0,
            tools_used: Vec::new(),
        }
    }
}

/// Outcome of running the workflow on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResult {
    /// Device display name
    pub device: String,

    /// Device identifier
    pub udid: String,

    /// True iff every step ran (or resumed) and succeeded, in order
    pub success: bool,

    /// Device-level failure (boot, launch, readiness), if any
    pub error: Option<String>,

    pub steps: Vec<StepResult>,

    /// Wall time spent on this device (milliseconds)
    pub duration_ms: u64,
}

impl DeviceResult {
    /// Number of successful steps
    pub fn successful_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }
}

/// Outcome of a whole workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow: String,

    /// Logical AND over all device results (false when no device ran)
    pub success: bool,

    /// Run-level failure (no devices resolved, backend unavailable)
    pub error: Option<String>,

    pub devices: Vec<DeviceResult>,

    pub started_at: DateTime<Utc>,

    /// Total wall time (milliseconds)
    pub total_duration_ms: u64,
}

/// Where a failed run first went wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstFailure {
    pub device: String,
    /// Goal of the failing step; `None` when the device failed before any step
    pub goal: Option<String>,
    pub error: String,
}

impl WorkflowResult {
    /// First failing device, with its first failing step if there is one
    pub fn first_failure(&self) -> Option<FirstFailure> {
        let device = self.devices.iter().find(|d| !d.success)?;

        if let Some(step) = device.steps.iter().find(|s| !s.success) {
            return Some(FirstFailure {
                device: device.device.clone(),
                goal: Some(step.step.goal.clone()),
                error: step.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Some(FirstFailure {
            device: device.device.clone(),
            goal: None,
            error: device
                .error
                .clone()
                .unwrap_or_else(|| "not every step was attempted".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(name: &str, success: bool, steps: Vec<StepResult>, error: Option<&str>) -> DeviceResult {
        DeviceResult {
            device: name.to_string(),
            udid: format!("{}-udid", name),
            success,
            error: error.map(str::to_string),
            steps,
            duration_ms: 10,
        }
    }

    fn failed_step(goal: &str, error: &str) -> StepResult {
        StepResult {
            step: StepSpec::new(goal),
            success: false,
            screenshot_path: None,
            error: Some(error.to_string()),
            iterations: 3,
            tools_used: vec!["ui_view".to_string()],
        }
    }

    #[test]
    fn test_first_failure_reports_step_goal() {
        let result = WorkflowResult {
            workflow: "wf".into(),
            success: false,
            error: None,
            devices: vec![
                device("ok", true, vec![StepResult::resumed(&StepSpec::new("a"), None)], None),
                device("bad", false, vec![failed_step("Open About", "button missing")], None),
            ],
            started_at: Utc::now(),
            total_duration_ms: 20,
        };

        assert_eq!(
            result.first_failure(),
            Some(FirstFailure {
                device: "bad".into(),
                goal: Some("Open About".into()),
                error: "button missing".into(),
            })
        );
    }

    #[test]
    fn test_first_failure_falls_back_to_device_error() {
        let result = WorkflowResult {
            workflow: "wf".into(),
            success: false,
            error: None,
            devices: vec![device("bad", false, vec![], Some("failed to launch com.example"))],
            started_at: Utc::now(),
            total_duration_ms: 5,
        };

        let failure = result.first_failure().unwrap();
        assert_eq!(failure.goal, None);
        assert_eq!(failure.error, "failed to launch com.example");
    }

    #[test]
    fn test_resumed_step_has_no_iterations() {
        let step = StepSpec::new("a").screenshot("a.png");
        let result = StepResult::resumed(&step, Some(PathBuf::from("/x/a.png")));
        assert!(result.success);
        assert_eq!(result.iterations, 0);
        assert!(result.tools_used.is_empty());
    }
}
