//! Top-level workflow execution across devices.

use chrono::Utc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::RunSettings;
use super::device::DeviceRunner;
use crate::capability::CapabilityChannel;
use crate::model::ModelChannel;
use crate::runner::{DeviceResult, WorkflowResult};
use crate::simulator::{Device, DeviceControl, DeviceError, find_device};
use crate::workflow::WorkflowSpec;

/// Disconnects the channel when dropped, whatever path leaves the run
struct Connected<'a, C: CapabilityChannel> {
    channel: &'a mut C,
}

impl<C: CapabilityChannel> Drop for Connected<'_, C> {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}

/// Owns the collaborators for a run and drives devices one at a time
pub struct WorkflowCoordinator<D, C, M> {
    devices: D,
    capabilities: C,
    model: M,
    settings: RunSettings,
}

impl<D, C, M> WorkflowCoordinator<D, C, M>
where
    D: DeviceControl,
    C: CapabilityChannel,
    M: ModelChannel,
{
    pub fn new(devices: D, capabilities: C, model: M) -> Self {
        Self {
            devices,
            capabilities,
            model,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Resolve declared names against one device listing.
    ///
    /// Unmatched names are logged and dropped. A device matched by more than
    /// one name is kept once.
    pub fn resolve_devices(&self, names: &[String]) -> Result<Vec<Device>, DeviceError> {
        let available = self.devices.list()?;
        let mut resolved: Vec<Device> = Vec::new();

        for name in names {
            match find_device(&available, name) {
                Some(device) if resolved.iter().any(|d| d.udid == device.udid) => {
                    warn!(%name, device = %device.name, "device already selected, ignoring duplicate");
                }
                Some(device) => {
                    info!(%name, device = %device.name, udid = %device.udid, "resolved device");
                    resolved.push(device.clone());
                }
                None => warn!(%name, "no simulator matches device name, skipping"),
            }
        }

        Ok(resolved)
    }

    pub fn run(&mut self, workflow: &WorkflowSpec) -> WorkflowResult {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(workflow = %workflow.name, steps = workflow.steps.len(), "starting workflow");

        let finish = |devices: Vec<DeviceResult>, error: Option<String>| {
            let success = error.is_none() && !devices.is_empty() && devices.iter().all(|d| d.success);
            WorkflowResult {
                workflow: workflow.name.clone(),
                success,
                error,
                devices,
                started_at,
                total_duration_ms: started.elapsed().as_millis() as u64,
            }
        };

        let targets = match self.resolve_devices(&workflow.devices) {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "failed to list devices");
                return finish(Vec::new(), Some(format!("failed to list devices: {}", e)));
            }
        };

        if targets.is_empty() {
            error!("none of the declared devices are available");
            return finish(
                Vec::new(),
                Some(format!(
                    "no available device matches any of: {}",
                    workflow.devices.join(", ")
                )),
            );
        }

        let Self {
            devices,
            capabilities,
            model,
            settings,
        } = self;

        let guard = Connected {
            channel: capabilities,
        };
        if let Err(e) = guard.channel.connect() {
            error!(error = %e, "failed to connect to automation backend");
            return finish(Vec::new(), Some(e.to_string()));
        }

        let mut results = Vec::with_capacity(targets.len());
        for device in &targets {
            let result =
                DeviceRunner::new(workflow, settings, &*devices, &mut *guard.channel, &mut *model)
                    .run(device);
            info!(
                device = %result.device,
                success = result.success,
                passed = result.successful_steps(),
                total = workflow.steps.len(),
                "device finished"
            );
            results.push(result);
        }
        drop(guard);

        let result = finish(results, None);
        info!(success = result.success, duration_ms = result.total_duration_ms, "workflow finished");
        result
    }
}
