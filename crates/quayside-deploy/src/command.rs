//! External command execution.
//!
//! Every external program the pipeline drives (git, caddy, version
//! managers, service run commands) goes through [`CommandExecutor`]. The
//! executor never raises for a non-zero exit; callers inspect the returned
//! [`CommandResult`] and decide what a failure means for them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, DeployResult};
use crate::queue::DeployQueue;

/// Exit code reported when a command exceeds its allotted duration.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Sentinel written to stdout when a command is accepted for queued
/// execution. Acceptance is not completion.
pub const ASYNC_ACCEPTED: &str = "accepted for background execution";

/// Options for a single command invocation.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Wall-clock limit for synchronous execution.
    pub timeout: Duration,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Environment variable overlay on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Hand the command to the work queue instead of running it inline.
    pub detach: bool,
    /// Display name used in logs and results in place of the raw command.
    /// Set this when the raw command embeds credentials.
    pub label: Option<String>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            cwd: None,
            env: BTreeMap::new(),
            detach: false,
            label: None,
        }
    }
}

impl CommandOptions {
    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add one environment variable to the overlay.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Extend the environment overlay.
    #[must_use]
    pub fn with_envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Queue the command for eventual background execution.
    #[must_use]
    pub const fn detached(mut self) -> Self {
        self.detach = true;
        self
    }

    /// Set the display name used in logs and results.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The outcome of one external-program invocation.
///
/// Produced fresh per invocation and never persisted.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The command that ran (or its display label).
    pub command: String,
    /// Exit code; absent for queued execution.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// True iff the exit code is present and zero, or the command was
    /// accepted for queued execution.
    pub successful: bool,
    /// True iff the command was queued rather than run inline.
    pub is_async: bool,
}

impl CommandResult {
    fn finished(command: String, exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            command,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            successful: exit_code == 0,
            is_async: false,
        }
    }

    fn fault(command: String, message: String) -> Self {
        Self::finished(command, 1, String::new(), message)
    }

    fn timed_out(command: String, limit: Duration) -> Self {
        Self {
            command,
            exit_code: Some(TIMEOUT_EXIT_CODE),
            stdout: String::new(),
            stderr: format!("command timed out after {}s", limit.as_secs()),
            successful: false,
            is_async: false,
        }
    }

    fn accepted(command: String) -> Self {
        Self {
            command,
            exit_code: None,
            stdout: ASYNC_ACCEPTED.to_owned(),
            stderr: String::new(),
            successful: true,
            is_async: true,
        }
    }

    /// Whether this result reports a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.exit_code == Some(TIMEOUT_EXIT_CODE)
    }
}

/// Runs external programs with captured output and a timeout.
///
/// Commands are passed to `sh -c`, own their process group, and have the
/// whole group killed on timeout expiry.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    queue: Option<Arc<DeployQueue>>,
}

impl CommandExecutor {
    /// Create an executor without a work queue. Detached execution will
    /// fail until a queue is attached.
    #[must_use]
    pub fn new() -> Self {
        Self { queue: None }
    }

    /// Create an executor that hands detached commands to the given queue.
    #[must_use]
    pub fn with_queue(queue: Arc<DeployQueue>) -> Self {
        Self { queue: Some(queue) }
    }

    /// Execute a command.
    ///
    /// Synchronous mode always returns `Ok` with the real outcome encoded
    /// in the result, including spawn faults (exit code 1) and timeouts
    /// (exit code [`TIMEOUT_EXIT_CODE`]). Detached mode returns an
    /// acceptance result, or an error if no queue is attached or the queue
    /// is full.
    pub async fn execute(&self, command: &str, options: CommandOptions) -> DeployResult<CommandResult> {
        let display = options.label.clone().unwrap_or_else(|| command.to_owned());

        if options.detach {
            let queue = self
                .queue
                .as_ref()
                .ok_or_else(|| DeployError::internal("detached execution requires a work queue"))?;
            queue.submit_command(command, options.clone()).await?;
            debug!(command = %display, "command queued for background execution");
            return Ok(CommandResult::accepted(display));
        }

        Ok(self.run_inline(command, &display, &options).await)
    }

    async fn run_inline(&self, command: &str, display: &str, options: &CommandOptions) -> CommandResult {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        debug!(command = %display, timeout_secs = options.timeout.as_secs(), "spawning command");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(command = %display, error = %e, "failed to spawn command");
                return CommandResult::fault(display.to_owned(), e.to_string());
            }
        };

        let pid = child.id();

        let capture = capture_output(&mut child, display);
        match tokio::time::timeout(options.timeout, capture).await {
            Ok(Ok((exit_code, stdout, stderr))) => {
                CommandResult::finished(display.to_owned(), exit_code, stdout, stderr)
            }
            Ok(Err(e)) => {
                error!(command = %display, error = %e, "failed waiting for command");
                CommandResult::fault(display.to_owned(), e.to_string())
            }
            Err(_) => {
                warn!(
                    command = %display,
                    timeout_secs = options.timeout.as_secs(),
                    "command timed out, killing process group"
                );
                kill_process_group(&mut child, pid).await;
                CommandResult::timed_out(display.to_owned(), options.timeout)
            }
        }
    }
}

/// Read stdout and stderr line-by-line until both close, then reap the
/// child. Each stdout line is logged as an informational event and each
/// stderr line as an error event, tagged with the originating command.
async fn capture_output(
    child: &mut tokio::process::Child,
    display: &str,
) -> std::io::Result<(i32, String, String)> {
    let mut stdout_reader = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr_reader = child.stderr.take().map(|s| BufReader::new(s).lines());

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();

    let mut stdout_done = stdout_reader.is_none();
    let mut stderr_done = stderr_reader.is_none();

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = async {
                match stdout_reader.as_mut() {
                    Some(reader) => reader.next_line().await,
                    None => std::future::pending().await,
                }
            }, if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        info!(command = %display, "{line}");
                        stdout_lines.push(line);
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        warn!(command = %display, error = %e, "error reading stdout");
                        stdout_done = true;
                    }
                }
            }
            line = async {
                match stderr_reader.as_mut() {
                    Some(reader) => reader.next_line().await,
                    None => std::future::pending().await,
                }
            }, if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        error!(command = %display, "{line}");
                        stderr_lines.push(line);
                    }
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        warn!(command = %display, error = %e, "error reading stderr");
                        stderr_done = true;
                    }
                }
            }
        }
    }

    let status = child.wait().await?;
    let exit_code = status.code().unwrap_or(1);

    Ok((
        exit_code,
        join_lines(&stdout_lines),
        join_lines(&stderr_lines),
    ))
}

fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Kill the command's whole process group, falling back to the direct
/// child if the group signal cannot be delivered.
async fn kill_process_group(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // The child is its own process group leader (process_group(0)).
        #[allow(clippy::cast_possible_wrap)]
        let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if result != 0 {
            warn!(pid, "killpg failed, killing direct child only");
        }
    }

    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out command");
    }
    let _ = child.wait().await;
}
