//! The pre-run command never outlives its device run.

#![cfg(unix)]

mod support;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::TempDir;

use shotter::orchestrator::{PreRunProcess, ReadinessError, ready_pattern};
use shotter::{DeviceSession, RunSettings, StepSpec, WorkflowCoordinator, WorkflowSpec};
use support::{FakeCapabilities, FakeDevices, ScriptedModel, complete};

fn workflow(output: &TempDir, run_before: String) -> WorkflowSpec {
    WorkflowSpec::new("Cleanup", "com.example.app")
        .device("iPhone 15")
        .output_dir(output.path().join("shots"))
        .run_before(run_before)
        .step(StepSpec::new("Open the settings tab"))
        .step(StepSpec::new("Open the about screen"))
}

fn settings() -> RunSettings {
    RunSettings::immediate()
        .shell("sh")
        .readiness_timeout(Duration::from_millis(500))
}

fn read_pid(path: &Path) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "no pid written to {}", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}

/// Alive and not a zombie waiting to be reaped by init
fn process_running(pid: i32) -> bool {
    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}

fn assert_gone(pid: i32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_running(pid) {
        assert!(Instant::now() < deadline, "process {} still running", pid);
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_pre_run_stopped_after_successful_run() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("pid");
    let command = format!(
        "echo $$ > '{}'; echo 'Opening com.example.app'; exec sleep 30",
        pidfile.display()
    );

    let model = ScriptedModel::new()
        .reply(complete(true, "Settings open"))
        .reply(complete(true, "About open"));
    let result = WorkflowCoordinator::new(FakeDevices::with(&["iPhone 15"]), FakeCapabilities::new(), model)
        .with_settings(settings())
        .run(&workflow(&tmp, command));

    assert!(result.success);
    assert_gone(read_pid(&pidfile));
}

#[test]
fn test_pre_run_stopped_after_step_failure() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("pid");
    let command = format!(
        "echo $$ > '{}'; echo 'Opening com.example.app'; exec sleep 30",
        pidfile.display()
    );

    let model = ScriptedModel::new().reply(complete(false, "Settings tab missing"));
    let result = WorkflowCoordinator::new(FakeDevices::with(&["iPhone 15"]), FakeCapabilities::new(), model)
        .with_settings(settings())
        .run(&workflow(&tmp, command));

    assert!(!result.success);
    assert_eq!(result.devices[0].steps.len(), 1);
    assert_gone(read_pid(&pidfile));
}

#[test]
fn test_pre_run_stopped_after_readiness_timeout() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("pid");
    let command = format!("echo $$ > '{}'; exec sleep 30", pidfile.display());

    let mut run = WorkflowCoordinator::new(
        FakeDevices::with(&["iPhone 15"]),
        FakeCapabilities::new(),
        ScriptedModel::new(),
    )
    .with_settings(settings());
    let result = run.run(&workflow(&tmp, command));

    assert!(!result.success);
    assert!(result.devices[0].error.as_deref().unwrap().contains("not ready"));
    assert_eq!(run.model().calls(), 0);
    assert_gone(read_pid(&pidfile));
}

#[test]
fn test_background_job_stopped_when_shell_exits_early() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("pid");
    let command = format!("sleep 30 & echo $! > '{}'; exit 1", pidfile.display());

    let result = WorkflowCoordinator::new(
        FakeDevices::with(&["iPhone 15"]),
        FakeCapabilities::new(),
        ScriptedModel::new(),
    )
    .with_settings(settings())
    .run(&workflow(&tmp, command));

    assert!(!result.success);
    assert!(
        result.devices[0]
            .error
            .as_deref()
            .unwrap()
            .contains("exited before signalling readiness")
    );
    assert_gone(read_pid(&pidfile));
}

#[test]
fn test_terminate_reaches_group_after_leader_exit() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("pid");
    let command = format!("sleep 30 & echo $! > '{}'; exit 2", pidfile.display());
    let session = DeviceSession::new(tmp.path(), "iPhone 15", Some("UDID-1".into()));

    let mut process = PreRunProcess::spawn("sh", &command, &session).unwrap();
    let pattern = ready_pattern("com.example.app").unwrap();
    let err = process
        .wait_ready(&pattern, Duration::from_secs(10))
        .unwrap_err();
    assert!(matches!(err, ReadinessError::ExitedEarly { code: Some(2) }));

    let background = read_pid(&pidfile);
    assert!(process_running(background));

    assert!(process.terminate());
    assert!(!process.terminate());
    assert_gone(background);
}
