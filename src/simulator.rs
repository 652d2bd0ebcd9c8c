//! Simulator enumeration and control.
//!
//! [`DeviceControl`] is the seam the orchestrator uses to list, boot, and
//! surface devices. [`Simctl`] implements it with `xcrun simctl`.

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// State string reported by simctl for a running device
pub const BOOTED: &str = "Booted";

/// Prefix stripped from simctl runtime identifiers
const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

/// A concrete simulator device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Unique device identifier
    pub udid: String,
    pub state: String,
    /// Runtime label, e.g. "iOS-17-5"
    pub runtime: String,
}

impl Device {
    pub fn is_booted(&self) -> bool {
        self.state == BOOTED
    }
}

/// Errors from the device-control collaborator
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse device list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("device {udid} did not reach the booted state")]
    BootTimeout { udid: String },
}

/// Device enumeration and preparation
pub trait DeviceControl {
    /// List available devices
    fn list(&self) -> Result<Vec<Device>, DeviceError>;

    /// Boot a device (no-op if already booted)
    fn boot(&self, udid: &str) -> Result<(), DeviceError>;

    /// Bring the simulator UI to the foreground
    fn open(&self) -> Result<(), DeviceError>;

    /// Shut a device down
    fn shutdown(&self, udid: &str) -> Result<(), DeviceError>;
}

/// Find a device by name: exact match, then substring, then all words present.
///
/// Matching is case-insensitive; the first device matching at the highest
/// priority level wins.
pub fn find_device<'a>(devices: &'a [Device], pattern: &str) -> Option<&'a Device> {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return None;
    }

    if let Some(device) = devices.iter().find(|d| d.name.to_lowercase() == pattern) {
        return Some(device);
    }

    if let Some(device) = devices.iter().find(|d| d.name.to_lowercase().contains(&pattern)) {
        return Some(device);
    }

    let words: Vec<&str> = pattern.split_whitespace().collect();
    devices.iter().find(|d| {
        let name = d.name.to_lowercase();
        words.iter().all(|word| name.contains(word))
    })
}

// ============================================================================
// simctl implementation
// ============================================================================

#[derive(Debug, Deserialize)]
struct SimctlList {
    /// Runtime id to devices, in the order simctl reports them
    devices: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    name: String,
    udid: String,
    state: String,
    #[serde(default)]
    is_available: bool,
}

/// Parse `xcrun simctl list devices --json` output, keeping available iOS devices
pub fn parse_device_list(json: &str) -> Result<Vec<Device>, DeviceError> {
    let list: SimctlList = serde_json::from_str(json)?;
    let mut devices = Vec::new();

    for (runtime, entries) in list.devices {
        if !runtime.contains("iOS") {
            continue;
        }
        let runtime = runtime.trim_start_matches(RUNTIME_PREFIX).to_string();
        let entries: Vec<SimctlDevice> = serde_json::from_value(entries)?;
        for entry in entries.into_iter().filter(|d| d.is_available) {
            devices.push(Device {
                name: entry.name,
                udid: entry.udid,
                state: entry.state,
                runtime: runtime.clone(),
            });
        }
    }

    Ok(devices)
}

/// `xcrun simctl` backed device control
#[derive(Debug, Clone)]
pub struct Simctl {
    /// Polls while waiting for a device to boot
    pub boot_poll_attempts: u32,
    /// Interval between boot polls
    pub boot_poll_interval: Duration,
    /// Delay after opening the Simulator app
    pub open_settle: Duration,
}

impl Default for Simctl {
    fn default() -> Self {
        Self {
            boot_poll_attempts: 30,
            boot_poll_interval: Duration::from_secs(1),
            open_settle: Duration::from_secs(2),
        }
    }
}

impl Simctl {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String, DeviceError> {
        let command = format!("{} {}", program, args.join(" "));
        debug!(%command, "running device command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| DeviceError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn state_of(&self, udid: &str) -> Result<Option<String>, DeviceError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|d| d.udid == udid)
            .map(|d| d.state))
    }
}

impl DeviceControl for Simctl {
    fn list(&self) -> Result<Vec<Device>, DeviceError> {
        let json = self.run("xcrun", &["simctl", "list", "devices", "--json"])?;
        parse_device_list(&json)
    }

    fn boot(&self, udid: &str) -> Result<(), DeviceError> {
        if self.state_of(udid)?.as_deref() == Some(BOOTED) {
            info!(udid, "device already booted");
            return Ok(());
        }

        info!(udid, "booting simulator");
        self.run("xcrun", &["simctl", "boot", udid])?;

        for _ in 0..self.boot_poll_attempts {
            if self.state_of(udid)?.as_deref() == Some(BOOTED) {
                return Ok(());
            }
            thread::sleep(self.boot_poll_interval);
        }

        Err(DeviceError::BootTimeout {
            udid: udid.to_string(),
        })
    }

    fn open(&self) -> Result<(), DeviceError> {
        self.run("open", &["-a", "Simulator"])?;
        thread::sleep(self.open_settle);
        Ok(())
    }

    fn shutdown(&self, udid: &str) -> Result<(), DeviceError> {
        match self.run("xcrun", &["simctl", "shutdown", udid]) {
            // Already shut down
            Err(DeviceError::Failed { .. }) => Ok(()),
            other => other.map(|_| ()),
        }
    }
}
