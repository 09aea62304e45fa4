//! Scripted stand-ins for external tools.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::capability::{Capability, DependencyError, EnsureCapability};
use super::{CommandRunner, CommandSpec, ExecResult, ProcessError};

type Handler = Box<dyn Fn(&CommandSpec) -> Result<ExecResult, ProcessError> + Send + Sync>;

/// Runner whose behaviour is a closure; records every command it sees.
pub(crate) struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&CommandSpec) -> Result<ExecResult, ProcessError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecResult, ProcessError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.handler)(spec)
    }
}

pub(crate) fn exit(code: i32, stderr: &str) -> Result<ExecResult, ProcessError> {
    Ok(ExecResult {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

/// Capability check with a fixed answer.
pub(crate) struct FixedCapability(pub bool);

#[async_trait]
impl EnsureCapability for FixedCapability {
    async fn ensure(&self, capability: &Capability) -> Result<(), DependencyError> {
        if self.0 {
            Ok(())
        } else {
            Err(DependencyError::InstallFailed {
                binary: capability.binary,
                tried: "apt-get".to_string(),
            })
        }
    }
}
