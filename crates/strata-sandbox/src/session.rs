//! Host side of one sandbox connection.

use crate::error::{Result, SandboxError};
use crate::protocol::{encode, HostMessage, SandboxMessage};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// How long a sandbox process gets to exit after its input is closed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Request/response channel to a running sandbox.
///
/// Commands are strictly sequential: [`execute`](Self::execute) does not
/// return before the sandbox's terminal message for that command arrives.
pub struct SandboxSession {
    reader: BufReader<Reader>,
    writer: BufWriter<Writer>,
    child: Option<Child>,
    line: String,
}

impl SandboxSession {
    /// Wrap an already-connected message stream.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: BufWriter::new(Box::new(writer)),
            child: None,
            line: String::new(),
        }
    }

    /// Tie the session to the sandbox process serving it.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Run `command` in the sandbox, streaming its output into `log`.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::CommandFailed`] if the sandbox reports an error
    /// - [`SandboxError::ProtocolViolation`] on an undecodable message or a
    ///   channel that closes before the terminal result
    /// - [`SandboxError::Cancelled`] if `cancel` fires first
    pub async fn execute(
        &mut self,
        command: &str,
        log: &mut (dyn Write + Send),
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let start = std::time::Instant::now();
        tracing::debug!(command = %command, "Sending command to sandbox");
        self.send(&HostMessage::Execute {
            command: command.to_string(),
        })
        .await?;

        let mut logged = 0usize;
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(command = %command, "Sandbox execution cancelled");
                    return Err(SandboxError::Cancelled);
                }
                message = self.recv() => message?,
            };

            match message {
                Some(SandboxMessage::Log { content }) => {
                    logged += content.len();
                    log.write_all(&content)?;
                }
                Some(SandboxMessage::Result { error }) => {
                    log.flush()?;
                    tracing::debug!(
                        command = %command,
                        log_bytes = logged,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        failed = !error.is_empty(),
                        "Sandbox command finished"
                    );
                    return if error.is_empty() {
                        Ok(())
                    } else {
                        Err(SandboxError::CommandFailed(error))
                    };
                }
                None => {
                    return Err(SandboxError::ProtocolViolation(
                        "channel closed before result".into(),
                    ))
                }
            }
        }
    }

    /// Close the input side and reap the sandbox process, if any.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if !status.success() {
                    tracing::warn!(status = %status, "Sandbox exited with failure status");
                }
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = EXIT_TIMEOUT.as_secs(),
                    "Sandbox did not exit, killing"
                );
                child.kill().await?;
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: &HostMessage) -> Result<()> {
        let line = encode(message)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next message. `None` means the sandbox closed the channel.
    async fn recv(&mut self) -> Result<Option<SandboxMessage>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::trace!(message = %line, "Sandbox message");
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| SandboxError::ProtocolViolation(format!("undecodable message: {e}")));
        }
    }
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}
