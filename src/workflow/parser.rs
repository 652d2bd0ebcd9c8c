//! Workflow YAML loading and validation.

use regex::{Captures, Regex};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use super::types::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_OUTPUT_DIR, DEFAULT_STEP_TIMEOUT_MS, LoadError, LoadResult,
    StepSpec, WorkflowSpec,
};

/// On-disk shape of a workflow file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkflow {
    #[serde(default)]
    name: String,
    description: Option<String>,
    #[serde(default)]
    bundle_id: String,
    #[serde(default)]
    devices: Vec<String>,
    run_before: Option<String>,
    max_iterations: Option<u32>,
    step_timeout: Option<u64>,
    output_dir: Option<PathBuf>,
    #[serde(default)]
    steps: Vec<StepSpec>,
}

/// Load a workflow file, expanding `${VAR}` references from the environment.
pub fn load_workflow(path: impl AsRef<Path>) -> LoadResult<WorkflowSpec> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let expanded = expand_env_vars(&raw, |name| std::env::var(name).ok());
    parse_workflow(&expanded)
}

/// Parse and validate workflow YAML that has already been expanded.
pub fn parse_workflow(content: &str) -> LoadResult<WorkflowSpec> {
    let raw: RawWorkflow = serde_yaml::from_str(content)?;

    if raw.name.trim().is_empty() {
        return Err(LoadError::Invalid("workflow must have a 'name' field".into()));
    }
    if raw.bundle_id.trim().is_empty() {
        return Err(LoadError::Invalid("workflow must have a 'bundleId' field".into()));
    }
    if raw.devices.is_empty() {
        return Err(LoadError::Invalid(
            "workflow must list at least one device under 'devices'".into(),
        ));
    }
    if raw.steps.is_empty() {
        return Err(LoadError::Invalid("workflow must have at least one step".into()));
    }
    if raw.max_iterations == Some(0) {
        return Err(LoadError::Invalid("'maxIterations' must be at least 1".into()));
    }

    for (i, step) in raw.steps.iter().enumerate() {
        if step.goal.trim().is_empty() {
            return Err(LoadError::Invalid(format!("step {} must have a 'goal' field", i + 1)));
        }
        if let Some(filename) = &step.screenshot {
            validate_screenshot_name(filename)
                .map_err(|reason| LoadError::Invalid(format!("step {}: {}", i + 1, reason)))?;
        }
    }

    Ok(WorkflowSpec {
        name: raw.name,
        description: raw.description,
        bundle_id: raw.bundle_id,
        devices: raw.devices,
        run_before: raw.run_before.filter(|cmd| !cmd.trim().is_empty()),
        max_iterations: raw.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        step_timeout: Duration::from_millis(raw.step_timeout.unwrap_or(DEFAULT_STEP_TIMEOUT_MS)),
        output_dir: raw.output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        steps: raw.steps,
    })
}

/// Screenshots must land inside the device directory
fn validate_screenshot_name(filename: &str) -> Result<(), String> {
    if filename.trim().is_empty() {
        return Err("screenshot filename is empty".to_string());
    }
    let path = Path::new(filename);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(format!(
            "screenshot '{}' must be a relative path inside the device directory",
            filename
        ));
    }
    Ok(())
}

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok())
        .as_ref()
}

/// Replace `${NAME}` with `lookup(NAME)`; unknown names are left untouched.
pub fn expand_env_vars<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(pattern) = env_var_pattern() else {
        return content.to_string();
    };
    pattern
        .replace_all(content, |caps: &Captures| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => {
                    warn!(variable = name, "environment variable is not set");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
name: Settings tour
bundleId: com.apple.Preferences
devices: ["iPhone 15"]
steps:
  - goal: Open General
    hints: ["Scroll if needed"]
  - goal: Open About
    screenshot: about.png
"#;

    #[test]
    fn test_parse_applies_defaults() {
        let workflow = parse_workflow(MINIMAL).unwrap();
        assert_eq!(workflow.name, "Settings tour");
        assert_eq!(workflow.bundle_id, "com.apple.Preferences");
        assert_eq!(workflow.max_iterations, 20);
        assert_eq!(workflow.step_timeout, Duration::from_millis(30_000));
        assert_eq!(workflow.output_dir, PathBuf::from("./screenshots"));
        assert_eq!(workflow.run_before, None);
        assert_eq!(
            workflow.steps,
            vec![
                StepSpec::new("Open General").hint("Scroll if needed"),
                StepSpec::new("Open About").screenshot("about.png"),
            ]
        );
    }

    #[test]
    fn test_parse_reads_optional_fields() {
        let yaml = r#"
name: Full
description: every field
bundleId: com.example.app
devices: ["iPhone 15", "iPad Air"]
runBefore: npm run ios
maxIterations: 7
stepTimeout: 1500
outputDir: /tmp/shots
steps:
  - goal: Reach home
"#;
        let workflow = parse_workflow(yaml).unwrap();
        assert_eq!(workflow.description.as_deref(), Some("every field"));
        assert_eq!(workflow.devices.len(), 2);
        assert_eq!(workflow.run_before.as_deref(), Some("npm run ios"));
        assert_eq!(workflow.max_iterations, 7);
        assert_eq!(workflow.step_timeout, Duration::from_millis(1500));
        assert_eq!(workflow.output_dir, PathBuf::from("/tmp/shots"));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let no_bundle = "name: x\ndevices: [a]\nsteps: [{goal: g}]\n";
        assert!(matches!(parse_workflow(no_bundle), Err(LoadError::Invalid(_))));

        let no_devices = "name: x\nbundleId: b\ndevices: []\nsteps: [{goal: g}]\n";
        assert!(matches!(parse_workflow(no_devices), Err(LoadError::Invalid(_))));

        let no_steps = "name: x\nbundleId: b\ndevices: [a]\n";
        assert!(matches!(parse_workflow(no_steps), Err(LoadError::Invalid(_))));

        let blank_goal = "name: x\nbundleId: b\ndevices: [a]\nsteps: [{goal: ' '}]\n";
        let err = parse_workflow(blank_goal).unwrap_err();
        assert!(err.to_string().contains("step 1"));
    }

    #[test]
    fn test_wrong_types_are_parse_errors() {
        let bad_hints = "name: x\nbundleId: b\ndevices: [a]\nsteps: [{goal: g, hints: nope}]\n";
        assert!(matches!(parse_workflow(bad_hints), Err(LoadError::Parse(_))));
    }

    #[test]
    fn test_screenshot_must_stay_inside_device_dir() {
        let escaping = "name: x\nbundleId: b\ndevices: [a]\nsteps: [{goal: g, screenshot: ../x.png}]\n";
        assert!(matches!(parse_workflow(escaping), Err(LoadError::Invalid(_))));

        let absolute = "name: x\nbundleId: b\ndevices: [a]\nsteps: [{goal: g, screenshot: /x.png}]\n";
        assert!(matches!(parse_workflow(absolute), Err(LoadError::Invalid(_))));

        let nested = "name: x\nbundleId: b\ndevices: [a]\nsteps: [{goal: g, screenshot: sub/x.png}]\n";
        assert!(parse_workflow(nested).is_ok());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let yaml = "name: x\nbundleId: b\ndevices: [a]\nmaxIterations: 0\nsteps: [{goal: g}]\n";
        assert!(matches!(parse_workflow(yaml), Err(LoadError::Invalid(_))));
    }

    #[test]
    fn test_expand_env_vars() {
        let lookup = |name: &str| match name {
            "BUNDLE" => Some("com.example.app".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_env_vars("bundleId: ${BUNDLE}\nkey: ${MISSING}", lookup),
            "bundleId: com.example.app\nkey: ${MISSING}"
        );
    }

    #[test]
    fn test_env_var_pattern_compiles() {
        let pattern = env_var_pattern().unwrap();
        assert!(pattern.is_match("${HOME}"));
        assert!(!pattern.is_match("$HOME"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_workflow("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }
}
