//! Verification: run a caller-supplied smoke test with the redirect in place.

#![allow(missing_docs)]

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Verification verdict as persisted in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Pass,
    Fail,
    Skipped,
}

/// Outcome of one verification command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub passed: bool,
    /// Exit code, `None` when killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Captured diagnostics (stderr, else stdout, else the spawn error).
    pub details: String,
}

impl VerificationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            exit_code: Some(0),
            details: String::new(),
        }
    }

    pub fn fail(exit_code: Option<i32>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            exit_code,
            details: details.into(),
        }
    }

    pub fn verdict(&self) -> Verification {
        if self.passed {
            Verification::Pass
        } else {
            Verification::Fail
        }
    }
}

/// Runs verification commands. `env` carries variables the command must see
/// (the exported redirect) on top of the inherited environment.
pub trait VerificationRunner {
    fn run(&self, command: &str, env: &[(String, String)]) -> VerificationOutcome;
}

impl<F> VerificationRunner for F
where
    F: Fn(&str, &[(String, String)]) -> VerificationOutcome,
{
    fn run(&self, command: &str, env: &[(String, String)]) -> VerificationOutcome {
        self(command, env)
    }
}

/// Runs commands through `<shell> -c <command>`.
#[derive(Debug, Clone)]
pub struct ShellVerificationRunner {
    shell: String,
    timeout: Option<Duration>,
}

impl ShellVerificationRunner {
    pub fn new(shell: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

impl Default for ShellVerificationRunner {
    fn default() -> Self {
        Self::new("sh", None)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl VerificationRunner for ShellVerificationRunner {
    fn run(&self, command: &str, env: &[(String, String)]) -> VerificationOutcome {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in env {
            cmd.env(name, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return VerificationOutcome::fail(None, format!("cannot start {}: {e}", self.shell));
            }
        };

        // Drain both pipes on their own threads so a chatty command cannot
        // block on a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return VerificationOutcome::fail(
                    None,
                    format!(
                        "timed out after {}s",
                        self.timeout.map_or(0, |t| t.as_secs())
                    ),
                );
            }
            Err(e) => return VerificationOutcome::fail(None, format!("wait failed: {e}")),
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if status.success() {
            return VerificationOutcome::pass();
        }
        let details = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        VerificationOutcome::fail(status.code(), details)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// `Ok(None)` when the deadline passed before the child exited.
fn wait(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
