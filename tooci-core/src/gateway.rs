//! # gateway: invoking external command-line tools
//!
//! Every interaction with the outside world (the chart tool, the registry inspection tool) goes
//! through the [`ToolGateway`] trait. Tests swap in a `mockall` mock or a hand-written fake
//! instead of spawning processes.
//!
//! ## Contract
//! - [`ToolGateway::run`] captures stdout and fails with [`MirrorError::Tool`] on non-zero exit,
//!   carrying argv, exit code and captured stderr.
//! - [`ToolGateway::run_passthrough`] inherits the caller's standard streams; failures carry no
//!   captured output.
//! - [`ToolGateway::run_capture_all`] never fails; callers branch on [`ToolOutput`] themselves.
//!   Launch failures and timeouts leave `exit_code` empty and describe themselves in `stderr`.
//! - A timeout kills the child and surfaces as [`MirrorError::Timeout`]. There are no retries.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{MirrorError, Result};

/// Everything a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn unlaunched(stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            exit_code: None,
        }
    }
}

/// Synchronous-from-the-caller's-view invocation of external commands.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Run `argv`, returning captured stdout. Non-zero exit is an error.
    async fn run(&self, argv: &[String], timeout: Option<Duration>) -> Result<String>;

    /// Run `argv` with inherited stdin/stdout/stderr. Non-zero exit is an error.
    async fn run_passthrough(&self, argv: &[String], timeout: Option<Duration>) -> Result<()>;

    /// Run `argv` and hand back stdout, stderr and exit code whatever happened. On expiry the
    /// child is killed and the output carries no exit code.
    async fn run_capture_all(&self, argv: &[String], timeout: Option<Duration>) -> ToolOutput;
}

/// Gateway backed by real child processes (`tokio::process`).
#[derive(Debug, Default, Clone)]
pub struct ProcessGateway;

impl ProcessGateway {
    pub fn new() -> Self {
        Self
    }
}

fn command_for(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| MirrorError::Invariant("refusing to run an empty command line".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    Ok(cmd)
}

/// Await `fut`, bounded by `timeout` if one is given. Dropping the future on expiry drops the
/// child, which `kill_on_drop` turns into a kill.
async fn bounded<F, T>(fut: F, argv: &[String], timeout: Option<Duration>) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(?argv, timeout_secs = limit.as_secs(), "[SHELL] Command timed out, killed");
                return Err(MirrorError::Timeout {
                    argv: argv.to_vec(),
                    timeout: limit,
                });
            }
        },
        None => fut.await,
    };
    outcome.map_err(|e| {
        error!(?argv, error = ?e, "[SHELL] Failed to launch command");
        MirrorError::Spawn {
            argv: argv.to_vec(),
            source: e,
        }
    })
}

#[async_trait]
impl ToolGateway for ProcessGateway {
    async fn run(&self, argv: &[String], timeout: Option<Duration>) -> Result<String> {
        info!(?argv, "[SHELL] Running command");
        let mut cmd = command_for(argv)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = bounded(cmd.output(), argv, timeout).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            error!(
                ?argv,
                exit_code = ?output.status.code(),
                stderr = %stderr,
                "[SHELL] Command exited with failure"
            );
            return Err(MirrorError::Tool {
                argv: argv.to_vec(),
                exit_code: output.status.code(),
                stderr,
            });
        }
        debug!(
            ?argv,
            exit_code = ?output.status.code(),
            stdout = %stdout,
            "[SHELL] Command finished"
        );
        Ok(stdout)
    }

    async fn run_passthrough(&self, argv: &[String], timeout: Option<Duration>) -> Result<()> {
        info!(?argv, "[SHELL] Running command (passthrough)");
        let mut cmd = command_for(argv)?;
        cmd.stdin(Stdio::inherit());
        let status = bounded(cmd.status(), argv, timeout).await?;
        if !status.success() {
            error!(?argv, exit_code = ?status.code(), "[SHELL] Command exited with failure");
            return Err(MirrorError::Tool {
                argv: argv.to_vec(),
                exit_code: status.code(),
                stderr: String::new(),
            });
        }
        debug!(?argv, "[SHELL] Command finished (passthrough)");
        Ok(())
    }

    async fn run_capture_all(&self, argv: &[String], timeout: Option<Duration>) -> ToolOutput {
        debug!(?argv, "[SHELL] Running command (capture all)");
        let mut cmd = match command_for(argv) {
            Ok(cmd) => cmd,
            Err(e) => return ToolOutput::unlaunched(e.to_string()),
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        match bounded(cmd.output(), argv, timeout).await {
            Ok(output) => {
                let result = ToolOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                };
                debug!(?argv, ?result, "[SHELL] Command finished (capture all)");
                result
            }
            Err(e) => ToolOutput::unlaunched(e.to_string()),
        }
    }
}

/// Convenience for building argv vectors from string literals and owned values alike.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
