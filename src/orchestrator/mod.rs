//! Multi-device workflow orchestration.
//!
//! - [`WorkflowCoordinator`] resolves devices and owns the shared capability channel
//! - [`DeviceRunner`] prepares one device and runs the remaining steps on it
//! - [`PreRunProcess`] supervises the optional readiness command

pub mod coordinator;
pub mod device;
pub mod prerun;

pub use coordinator::WorkflowCoordinator;
pub use device::{DeviceFailure, DeviceRunner};
pub use prerun::{PreRunProcess, ReadinessError, ready_pattern};

use std::time::Duration;

use crate::config::{self, TimingSettings};

/// Delays and limits applied while preparing devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Pause after booting and surfacing the device
    pub boot_settle: Duration,
    /// Pause after launching the app
    pub launch_settle: Duration,
    /// Pause after the pre-run command reports readiness
    pub ready_settle: Duration,
    /// Ceiling on waiting for the pre-run command
    pub readiness_timeout: Duration,
    /// Shell that runs the pre-run command
    pub shell: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_timing(&config::get().timing)
    }
}

impl RunSettings {
    pub fn from_timing(timing: &TimingSettings) -> Self {
        Self {
            boot_settle: Duration::from_millis(timing.boot_settle_ms),
            launch_settle: Duration::from_millis(timing.launch_settle_ms),
            ready_settle: Duration::from_millis(timing.ready_settle_ms),
            readiness_timeout: timing.ready_timeout(),
            shell: timing.shell.clone(),
        }
    }

    /// No settle delays; useful when the device side is simulated
    pub fn immediate() -> Self {
        Self {
            boot_settle: Duration::ZERO,
            launch_settle: Duration::ZERO,
            ready_settle: Duration::ZERO,
            ..Self::from_timing(&TimingSettings::defaults())
        }
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_default_timing() {
        let settings = RunSettings::from_timing(&TimingSettings::defaults());
        assert_eq!(settings.boot_settle, Duration::from_secs(3));
        assert_eq!(settings.launch_settle, Duration::from_secs(2));
        assert_eq!(settings.readiness_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_immediate_settings() {
        let settings = RunSettings::immediate().shell("sh").readiness_timeout(Duration::from_secs(1));
        assert_eq!(settings.boot_settle, Duration::ZERO);
        assert_eq!(settings.shell, "sh");
        assert_eq!(settings.readiness_timeout, Duration::from_secs(1));
    }
}
