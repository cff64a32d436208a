//! Async executor for OS networking tools
//!
//! Backends never spawn processes themselves; they hand a program and its
//! arguments to a [`CommandRunner`]. The system runner pipes stdio, enforces a
//! per-call timeout and maps a missing binary to
//! [`SpoofError::ToolUnavailable`]. Non-zero exits are returned as data so the
//! calling backend can classify the tool's stderr.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::error::{SpoofError, SpoofResult};

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`. `Err` only when the tool could not run at
    /// all (missing binary, spawn failure, timeout).
    async fn run(&self, program: &str, args: &[&str]) -> SpoofResult<CommandOutput>;
}

/// Runs real processes through tokio
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[instrument(skip(self), fields(cmd = %format!("{} {}", program, args.join(" "))))]
    async fn run(&self, program: &str, args: &[&str]) -> SpoofResult<CommandOutput> {
        debug!("executing: {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(tool = program, "tool not found in PATH");
                return Err(SpoofError::ToolUnavailable {
                    tool: program.to_string(),
                });
            }
            Ok(Err(e)) => return Err(SpoofError::Io(e)),
            Err(_elapsed) => {
                error!(tool = program, secs = self.timeout.as_secs(), "tool timed out");
                return Err(SpoofError::Timeout {
                    tool: program.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if !result.success() {
            debug!(code = result.code, stderr = %result.stderr, "tool exited unsuccessfully");
        }
        Ok(result)
    }
}

const PERMISSION_MARKERS: &[&str] = &[
    "operation not permitted",
    "permission denied",
    "access is denied",
    "requires elevation",
    "must be root",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "does not exist",
    "no such device",
    "cannot find device",
    "no msft_netadapter objects found",
];

const UNSUPPORTED_MARKERS: &[&str] = &[
    "cannot assign requested address",
    "not supported",
    "no matching keyword",
    "address family not supported",
];

/// Map a failed invocation to the error taxonomy by sniffing stderr
pub fn classify_failure(interface: &str, tool: &str, output: &CommandOutput) -> SpoofError {
    let text = if output.stderr.is_empty() {
        output.stdout.to_lowercase()
    } else {
        output.stderr.to_lowercase()
    };

    if PERMISSION_MARKERS.iter().any(|m| text.contains(m)) {
        return SpoofError::PermissionDenied(format!("{}: {}", tool, output.stderr));
    }
    if NOT_FOUND_MARKERS.iter().any(|m| text.contains(m)) {
        return SpoofError::NotFound {
            interface: interface.to_string(),
        };
    }
    if UNSUPPORTED_MARKERS.iter().any(|m| text.contains(m)) {
        return SpoofError::UnsupportedDriver {
            interface: interface.to_string(),
            detail: output.stderr.clone(),
        };
    }
    SpoofError::ToolFailure {
        tool: tool.to_string(),
        code: output.code,
        stderr: output.stderr.clone(),
    }
}

/// Run a tool and turn a non-zero exit into a classified error
pub async fn run_checked(
    runner: &dyn CommandRunner,
    interface: &str,
    program: &str,
    args: &[&str],
) -> SpoofResult<String> {
    let output = runner.run(program, args).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(classify_failure(interface, program, &output))
    }
}
