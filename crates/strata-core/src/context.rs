//! Sandbox-backed build context.

use crate::descriptor::BuildContext;
use crate::error::{BuildError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use strata_sandbox::{SandboxError, SandboxRunner};
use strata_store::BootEntry;
use tokio_util::sync::CancellationToken;

/// Build context for one layer. Each RUN gets its own sandbox.
pub struct SandboxContext<'a> {
    runner: &'a dyn SandboxRunner,
    root: PathBuf,
    log: &'a mut (dyn Write + Send),
    cancel: &'a CancellationToken,
    params: Vec<String>,
    boots: Vec<BootEntry>,
}

impl<'a> SandboxContext<'a> {
    /// Context for the layer rooted at `root`, starting from inherited params.
    pub fn new(
        runner: &'a dyn SandboxRunner,
        root: impl Into<PathBuf>,
        log: &'a mut (dyn Write + Send),
        cancel: &'a CancellationToken,
        params: Vec<String>,
    ) -> Self {
        Self {
            runner,
            root: root.into(),
            log,
            cancel,
            params,
            boots: Vec::new(),
        }
    }

    /// Consume the context, returning accumulated params and boot entries.
    pub fn into_parts(self) -> (Vec<String>, Vec<BootEntry>) {
        (self.params, self.boots)
    }
}

#[async_trait]
impl BuildContext for SandboxContext<'_> {
    fn add_params(&mut self, params: &[String]) {
        self.params.extend_from_slice(params);
    }

    fn add_boot(&mut self, entry: BootEntry) {
        self.boots.push(entry);
    }

    async fn run(&mut self, command: &str) -> Result<()> {
        let mut session = self.runner.open(&self.root).await?;
        match session.execute(command, &mut *self.log, self.cancel).await {
            Ok(()) => {
                if let Err(e) = session.close().await {
                    tracing::warn!(error = %e, "Failed to close sandbox session");
                }
                Ok(())
            }
            // Dropping the session kills the sandbox.
            Err(SandboxError::Cancelled) => Err(BuildError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }
}
