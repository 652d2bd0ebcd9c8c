//! Per-device session context and screenshot directory management.
//!
//! A [`DeviceSession`] is the explicit context handed to every operation that
//! targets one device:
//! - the device display name and identifier injected into capability calls
//! - a deterministic output directory derived from the display name
//! - artifact path resolution and resume detection for that directory

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::capability::Arguments;
use crate::capability::tools::DEVICE_ID_ARG;
use crate::workflow::StepSpec;

/// Context for one device's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    /// Display name of the device (e.g. "iPhone 15 Pro")
    pub device_name: String,
    /// Identifier injected into capability calls, if any
    pub device_id: Option<String>,
    /// Directory holding this device's screenshots
    pub dir: PathBuf,
}

impl DeviceSession {
    /// Create a session rooted at `<output_root>/<sanitized device name>`
    pub fn new(output_root: &Path, device_name: &str, device_id: Option<String>) -> Self {
        let root = std::path::absolute(output_root).unwrap_or_else(|_| output_root.to_path_buf());
        Self {
            device_name: device_name.to_string(),
            device_id,
            dir: root.join(sanitize_name(device_name)),
        }
    }

    /// Create the output directory (no error if it already exists)
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Add this session's device identifier to capability arguments.
    ///
    /// An identifier the caller already supplied is left untouched.
    pub fn target(&self, mut args: Arguments) -> Arguments {
        if let Some(id) = &self.device_id {
            if !args.contains_key(DEVICE_ID_ARG) {
                args.insert(DEVICE_ID_ARG.to_string(), Value::String(id.clone()));
            }
        }
        args
    }

    /// Get the absolute path for a declared screenshot filename
    pub fn screenshot_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Index of the first step that still has to run.
    ///
    /// Steps are scanned front to back. A step with a screenshot whose file
    /// exists moves the start past itself; the first step whose screenshot is
    /// missing ends the scan. Steps without a screenshot never move the start
    /// on their own, so they are only skipped when a later satisfied step
    /// precedes the first gap.
    pub fn find_start_index(&self, steps: &[StepSpec]) -> usize {
        let mut start = 0;
        for (i, step) in steps.iter().enumerate() {
            if let Some(filename) = &step.screenshot {
                if self.screenshot_path(filename).exists() {
                    start = i + 1;
                } else {
                    break;
                }
            }
        }
        start
    }

    /// List all screenshot files already captured for this device
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.is_file() {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

/// Turn a device display name into a filesystem-safe directory token
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, b"png").unwrap();
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("iPhone 15 Pro"), "iphone-15-pro");
        assert_eq!(sanitize_name("iPad (10th generation)"), "ipad--10th-generation-");
    }

    #[test]
    fn test_session_dir_is_deterministic() {
        let a = DeviceSession::new(Path::new("/tmp/shots"), "iPhone 15", None);
        let b = DeviceSession::new(Path::new("/tmp/shots"), "iPhone 15", Some("X".into()));
        assert_eq!(a.dir, b.dir);
        assert!(a.dir.ends_with("iphone-15"));
        assert!(a.screenshot_path("home.png").is_absolute());
    }

    #[test]
    fn test_target_injects_missing_device_id() {
        let session = DeviceSession::new(Path::new("/tmp/shots"), "iPhone 15", Some("UDID-1".into()));
        let args = session.target(Arguments::new());
        assert_eq!(args[DEVICE_ID_ARG], "UDID-1");

        let mut explicit = Arguments::new();
        explicit.insert(DEVICE_ID_ARG.into(), Value::String("OTHER".into()));
        assert_eq!(session.target(explicit)[DEVICE_ID_ARG], "OTHER");

        let anonymous = DeviceSession::new(Path::new("/tmp/shots"), "iPhone 15", None);
        assert!(anonymous.target(Arguments::new()).is_empty());
    }

    #[test]
    fn test_start_index_stops_at_first_gap() {
        let tmp = TempDir::new().unwrap();
        let session = DeviceSession::new(tmp.path(), "iPhone 15", None);
        session.init().unwrap();
        touch(&session.screenshot_path("a.png"));
        touch(&session.screenshot_path("c.png"));

        let steps = vec![
            StepSpec::new("A").screenshot("a.png"),
            StepSpec::new("B").screenshot("b.png"),
            StepSpec::new("C").screenshot("c.png"),
        ];
        assert_eq!(session.find_start_index(&steps), 1);
        // Unchanged directory, unchanged answer
        assert_eq!(session.find_start_index(&steps), 1);
    }

    #[test]
    fn test_start_index_passes_over_steps_without_screenshots() {
        let tmp = TempDir::new().unwrap();
        let session = DeviceSession::new(tmp.path(), "iPhone 15", None);
        session.init().unwrap();
        touch(&session.screenshot_path("done.png"));

        let steps = vec![
            StepSpec::new("prepare"),
            StepSpec::new("finish").screenshot("done.png"),
            StepSpec::new("trailing"),
        ];
        // The trailing step has no artifact of its own, so it still runs
        assert_eq!(session.find_start_index(&steps), 2);
        assert_eq!(session.find_start_index(&steps[..2]), 2);
        assert_eq!(session.find_start_index(&steps[..1]), 0);
    }

    #[test]
    fn test_start_index_alternating_capture() {
        let tmp = TempDir::new().unwrap();
        let session = DeviceSession::new(tmp.path(), "iPhone 15", None);
        session.init().unwrap();

        let steps: Vec<StepSpec> = (0..6)
            .map(|i| {
                let step = StepSpec::new(format!("Step {}", i));
                if i % 2 == 0 { step.screenshot(format!("step-{}.png", i)) } else { step }
            })
            .collect();
        touch(&session.screenshot_path("step-0.png"));
        touch(&session.screenshot_path("step-2.png"));

        // Step 3 has no screenshot and step 4 is missing, so step 3 runs next
        assert_eq!(session.find_start_index(&steps), 3);
    }

    #[test]
    fn test_init_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let session = DeviceSession::new(tmp.path(), "iPad Air", None);
        session.init().unwrap();
        session.init().unwrap();
        assert!(session.dir.is_dir());
        assert!(session.list_captures().unwrap().is_empty());
    }
}
