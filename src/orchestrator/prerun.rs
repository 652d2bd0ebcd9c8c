//! Supervision of the optional pre-run command.
//!
//! The command runs under a shell in its own process group with the device
//! exposed as `DEVICE` / `DEVICE_UDID`. Stdout is echoed to our stdout and
//! scanned for the readiness pattern; stderr is inherited untouched.

use regex::Regex;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::session::DeviceSession;

/// Polling interval while waiting for readiness or exit
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed between the interrupt and a forced kill
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Why the pre-run command never became ready
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("failed to start pre-run command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pre-run command exited before signalling readiness ({})", exit_label(.code))]
    ExitedEarly { code: Option<i32> },

    #[error("pre-run command not ready after {0:?}")]
    TimedOut(Duration),

    #[error("invalid readiness pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

/// Readiness signal for an app id: `Opening` followed by the literal id
pub fn ready_pattern(bundle_id: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("Opening.*{}", regex::escape(bundle_id)))
}

/// A running pre-run command
pub struct PreRunProcess {
    child: Option<Child>,
    /// Stdout chunks, held only until readiness is decided
    output: Option<Receiver<String>>,
}

impl PreRunProcess {
    /// Start `command` under `shell -c` for the session's device
    pub fn spawn(shell: &str, command: &str, session: &DeviceSession) -> Result<Self, ReadinessError> {
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .env("DEVICE", &session.device_name)
            .env("DEVICE_UDID", session.device_id.as_deref().unwrap_or(""))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        info!(%command, device = %session.device_name, "starting pre-run command");
        let mut child = cmd.spawn().map_err(ReadinessError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ReadinessError::Spawn(std::io::Error::other("stdout was not piped"))
        })?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || pump_output(stdout, tx));

        Ok(Self {
            child: Some(child),
            output: Some(rx),
        })
    }

    /// OS process id, while the process is still owned
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Block until stdout matches `pattern`, the process exits, or `timeout` passes.
    ///
    /// On timeout the process is terminated before returning. Output is no
    /// longer queued once this returns; the process keeps echoing to stdout.
    pub fn wait_ready(&mut self, pattern: &Regex, timeout: Duration) -> Result<(), ReadinessError> {
        let result = self.scan_output(pattern, timeout);
        self.output = None;
        result
    }

    fn scan_output(&mut self, pattern: &Regex, timeout: Duration) -> Result<(), ReadinessError> {
        let deadline = Instant::now() + timeout;
        let mut window = String::new();
        let mut stdout_open = true;

        loop {
            if stdout_open {
                let received = match &self.output {
                    Some(output) => output.recv_timeout(POLL_INTERVAL),
                    None => Err(RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(chunk) => {
                        window.push_str(&chunk);
                        if pattern.is_match(&window) {
                            info!("pre-run command is ready");
                            return Ok(());
                        }
                        // Keep only the unfinished line for the next match
                        if let Some(pos) = window.rfind('\n') {
                            window.drain(..=pos);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stdout_open = false,
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }

            if let Some(code) = self.exit_code() {
                // Output written just before exit still counts
                while let Some(output) = &self.output {
                    match output.try_recv() {
                        Ok(chunk) => {
                            window.push_str(&chunk);
                            if pattern.is_match(&window) {
                                info!("pre-run command is ready");
                                return Ok(());
                            }
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                warn!(?code, "pre-run command exited early");
                return Err(ReadinessError::ExitedEarly { code });
            }

            if Instant::now() >= deadline {
                warn!(?timeout, "pre-run command readiness timed out");
                self.terminate();
                return Err(ReadinessError::TimedOut(timeout));
            }
        }
    }

    /// `Some(code)` once the process has exited; code is `None` when killed by a signal
    fn exit_code(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "failed to poll pre-run command");
                None
            }
        }
    }

    /// Stop the whole process group and reap the child.
    ///
    /// The group is signalled even when the shell itself already exited, so
    /// background jobs it started are stopped too. Returns `true` the first
    /// time it is called, `false` afterwards.
    pub fn terminate(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(?status, "pre-run command already exited");
        }

        interrupt(&child);

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            let leader_done = matches!(child.try_wait(), Ok(Some(_)));
            if leader_done && !group_alive(&child) {
                info!("pre-run command stopped");
                return true;
            }
            thread::sleep(POLL_INTERVAL / 2);
        }

        warn!("pre-run command ignored interrupt, killing");
        force_kill(&mut child);
        let _ = child.wait();
        true
    }
}

impl Drop for PreRunProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn pump_output(mut stdout: impl Read, tx: mpsc::Sender<String>) {
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut out = std::io::stdout();
                let _ = out.write_all(&buf[..n]);
                let _ = out.flush();
                // Receiver gone means nobody is waiting; keep draining the pipe
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            }
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGINT) {
        debug!(error = %e, "failed to interrupt pre-run process group");
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

/// Whether any process is left in the child's group
#[cfg(unix)]
fn group_alive(child: &Child) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(child.id() as i32), None).is_ok()
}

#[cfg(not(unix))]
fn group_alive(_child: &Child) -> bool {
    false
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) {
    let _ = child.kill();
}
