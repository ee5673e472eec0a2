//! Builder for executing external tool commands under a cancel scope.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use wn_core::CancelScope;

/// Longest stderr tail carried into an error message.
const MAX_STDERR_IN_ERROR: usize = 2_000;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use wn_av::ToolCommand;
/// use wn_core::CancelScope;
///
/// # async fn example() -> wn_core::Result<()> {
/// let scope = CancelScope::new(Duration::from_secs(10));
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"), scope)
///     .arg("-hide_banner")
///     .arg("-version")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    scope: CancelScope,
}

impl ToolCommand {
    /// Create a command for `program` bound to `scope` (token + deadline).
    pub fn new(program: PathBuf, scope: CancelScope) -> Self {
        Self {
            program,
            args: Vec::new(),
            scope,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`wn_core::Error::TimedOut`] if the deadline passes; the process is
    ///   killed and reaped before returning.
    /// - [`wn_core::Error::Canceled`] if the scope is canceled; likewise.
    /// - [`wn_core::Error::Tool`] if spawning fails or the process exits with
    ///   a non-zero status (message includes stderr).
    pub async fn execute(&self) -> wn_core::Result<ToolOutput> {
        let program_name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string());

        let scope = &self.scope;
        scope.check()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| wn_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = scope
            .run(async { tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr)) })
            .await;

        let (status, stdout, stderr) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                // Reap the child before reporting so nothing keeps writing to
                // the output path after the caller cleans it up.
                if let Err(kill_err) = child.kill().await {
                    tracing::debug!(tool = %program_name, "kill after {e} failed: {kill_err}");
                }
                tracing::warn!(tool = %program_name, "{e}");
                return Err(e);
            }
        };

        let status = status.map_err(|e| {
            wn_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
        })?;

        let tool_output = ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        };

        if !status.success() {
            return Err(wn_core::Error::tool(
                program_name,
                format!(
                    "exited with status {status}: {}",
                    tail(tool_output.stderr.trim(), MAX_STDERR_IN_ERROR)
                ),
            ));
        }

        Ok(tool_output)
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("failed to drain child pipe: {e}");
        }
    }
    buf
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
