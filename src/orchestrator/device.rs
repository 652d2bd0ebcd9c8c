//! Running a workflow's steps on one device.

use serde_json::Value;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

use super::RunSettings;
use super::prerun::{PreRunProcess, ReadinessError, ready_pattern};
use crate::agent::StepExecutor;
use crate::capability::tools::LAUNCH_APP;
use crate::capability::{Arguments, CapabilityChannel};
use crate::model::ModelChannel;
use crate::runner::{DeviceResult, StepResult};
use crate::session::DeviceSession;
use crate::simulator::{Device, DeviceControl, DeviceError};
use crate::workflow::WorkflowSpec;

/// Why a device run stopped before its steps
#[derive(Debug, thiserror::Error)]
pub enum DeviceFailure {
    #[error("failed to create output directory: {0}")]
    OutputDir(#[source] std::io::Error),

    #[error("failed to prepare device: {0}")]
    Boot(#[from] DeviceError),

    #[error("failed to launch {bundle_id}: {reason}")]
    Launch { bundle_id: String, reason: String },

    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

/// Runs one workflow on one device through the shared channels
pub struct DeviceRunner<'a> {
    workflow: &'a WorkflowSpec,
    settings: &'a RunSettings,
    devices: &'a dyn DeviceControl,
    capabilities: &'a mut dyn CapabilityChannel,
    model: &'a mut dyn ModelChannel,
}

impl<'a> DeviceRunner<'a> {
    pub fn new(
        workflow: &'a WorkflowSpec,
        settings: &'a RunSettings,
        devices: &'a dyn DeviceControl,
        capabilities: &'a mut dyn CapabilityChannel,
        model: &'a mut dyn ModelChannel,
    ) -> Self {
        Self {
            workflow,
            settings,
            devices,
            capabilities,
            model,
        }
    }

    pub fn run(&mut self, device: &Device) -> DeviceResult {
        let started = Instant::now();
        let session = DeviceSession::new(
            &self.workflow.output_dir,
            &device.name,
            Some(device.udid.clone()),
        );
        info!(device = %device.name, udid = %device.udid, dir = %session.dir.display(), "starting device");

        let mut steps = Vec::with_capacity(self.workflow.steps.len());
        let mut prerun = None;

        let outcome = self.execute(&session, &mut steps, &mut prerun);

        // Every exit path stops the pre-run command
        if let Some(mut process) = prerun.take() {
            process.terminate();
        }

        let error = match outcome {
            Ok(()) => None,
            Err(failure) => {
                error!(device = %device.name, error = %failure, "device run failed");
                Some(failure.to_string())
            }
        };

        let success = error.is_none()
            && steps.len() == self.workflow.steps.len()
            && steps.iter().all(|s| s.success);

        DeviceResult {
            device: device.name.clone(),
            udid: device.udid.clone(),
            success,
            error,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn execute(
        &mut self,
        session: &DeviceSession,
        results: &mut Vec<StepResult>,
        prerun: &mut Option<PreRunProcess>,
    ) -> Result<(), DeviceFailure> {
        session.init().map_err(DeviceFailure::OutputDir)?;

        let steps = &self.workflow.steps;
        let start = session.find_start_index(steps);
        for step in &steps[..start] {
            let path = step.screenshot.as_deref().map(|f| session.screenshot_path(f));
            results.push(StepResult::resumed(step, path));
        }

        if start == steps.len() {
            info!(steps = start, "all steps already captured, skipping device");
            return Ok(());
        }
        if start > 0 {
            info!(skipped = start, "resuming after existing screenshots");
        }

        self.prepare(session)?;
        self.launch(session)?;

        if let Some(command) = &self.workflow.run_before {
            let pattern = ready_pattern(&self.workflow.bundle_id).map_err(ReadinessError::from)?;
            let process = prerun.insert(PreRunProcess::spawn(&self.settings.shell, command, session)?);
            process.wait_ready(&pattern, self.settings.readiness_timeout)?;
            thread::sleep(self.settings.ready_settle);
        }

        for (index, step) in steps.iter().enumerate().skip(start) {
            info!(step = index + 1, total = steps.len(), goal = %step.goal, "running step");

            let result = StepExecutor::new(&mut *self.model, &mut *self.capabilities, session)
                .run(step, self.workflow.max_iterations);

            let failed = !result.success;
            if failed {
                warn!(goal = %step.goal, error = ?result.error, "step failed");
            }
            results.push(result);
            if failed {
                break;
            }
        }

        Ok(())
    }

    fn prepare(&mut self, session: &DeviceSession) -> Result<(), DeviceFailure> {
        if let Some(udid) = &session.device_id {
            self.devices.boot(udid)?;
        }
        self.devices.open()?;
        thread::sleep(self.settings.boot_settle);
        Ok(())
    }

    fn launch(&mut self, session: &DeviceSession) -> Result<(), DeviceFailure> {
        let bundle_id = &self.workflow.bundle_id;
        info!(%bundle_id, "launching app");

        let mut args = Arguments::new();
        args.insert("bundle_id".into(), Value::String(bundle_id.clone()));
        args.insert("terminate_running".into(), Value::Bool(true));

        let reason = match self.capabilities.invoke(LAUNCH_APP, session.target(args)) {
            Ok(output) if !output.is_error => None,
            Ok(output) => Some(output.text_summary()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = reason {
            return Err(DeviceFailure::Launch {
                bundle_id: bundle_id.clone(),
                reason,
            });
        }

        thread::sleep(self.settings.launch_settle);
        Ok(())
    }
}
