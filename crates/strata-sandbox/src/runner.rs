//! Sandbox launchers.

use crate::error::{Result, SandboxError};
use crate::session::SandboxSession;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Opens a sandbox confined to a build root.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Start a sandbox for `root` and connect to it.
    async fn open(&self, root: &Path) -> Result<SandboxSession>;
}

/// Runs an external sandbox program per session.
///
/// The program is started as `<program> [args...] <root>` and speaks the
/// protocol over its stdin and stdout. Its stderr is inherited. The process
/// is killed if the session is dropped without being closed.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessRunner {
    /// Runner for `program` with no extra arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument placed before the build root.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl SandboxRunner for ProcessRunner {
    async fn open(&self, root: &Path) -> Result<SandboxSession> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SandboxError::ProtocolViolation(
                "sandbox process has no stdio pipes".into(),
            ));
        };

        tracing::debug!(
            program = %self.program.display(),
            root = %root.display(),
            pid = child.id(),
            "Started sandbox"
        );
        Ok(SandboxSession::new(stdout, stdin).with_child(child))
    }
}
