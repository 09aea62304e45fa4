//! External command execution.
//!
//! Every tool the pipeline shells out to (dump tool, archiver, package
//! managers) goes through a [`CommandRunner`], so tests can script tool
//! behaviour without the binaries being installed.

pub mod capability;
mod error;
mod host;
#[cfg(test)]
pub(crate) mod testing;

pub use capability::{Capability, DependencyError, EnsureCapability, Provisioner};
pub use error::ProcessError;
pub use host::HostRunner;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Default timeout for a single command (4 hours; large dumps are slow).
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Maximum bytes of stderr quoted in error messages.
const STDERR_EXCERPT_BYTES: usize = 2_048;

// ============================================================================
// CommandSpec
// ============================================================================

/// A command to run: program, arguments and environment.
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

// Arguments and environment values may carry credentials, so only their
// shape is printed.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field("cwd", &self.cwd)
            .field("env", &env_keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// ExecResult
// ============================================================================

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short, human-readable reason for a failed run.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            return format!("exit code {}", self.exit_code);
        }
        let mut start = stderr.len().saturating_sub(STDERR_EXCERPT_BYTES);
        while !stderr.is_char_boundary(start) {
            start += 1;
        }
        format!("exit code {}: {}", self.exit_code, &stderr[start..])
    }
}

// ============================================================================
// CommandRunner
// ============================================================================

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command, capturing its output.
    ///
    /// A non-zero exit is reported through [`ExecResult::exit_code`], not as an
    /// error. Errors mean the command could not run at all or timed out.
    async fn run(&self, spec: &CommandSpec) -> Result<ExecResult, ProcessError>;
}
