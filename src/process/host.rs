use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandRunner, CommandSpec, DEFAULT_EXEC_TIMEOUT, ExecResult, ProcessError};

/// Runs commands directly on the host.
#[derive(Debug, Default)]
pub struct HostRunner;

impl HostRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecResult, ProcessError> {
        let timeout = spec.timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        debug!(program = %spec.program, args = spec.args.len(), "Running command");

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ProcessError::Timeout {
                    program: spec.program.clone(),
                    timeout,
                });
            }
        };

        Ok(ExecResult {
            // Returns -1 if killed by signal (SIGKILL, SIGSEGV, etc.)
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
