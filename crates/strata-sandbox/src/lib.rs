//! # strata-sandbox
//!
//! Host side of the sandbox execution protocol used for RUN steps.
//!
//! A sandbox is an external process confined to a build root. The host sends
//! one `execute` message per command and reads `log` messages until exactly
//! one terminal `result` arrives. No pipelining.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_sandbox::{ProcessRunner, SandboxRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> strata_sandbox::Result<()> {
//! let runner = ProcessRunner::new("/usr/libexec/strata-sandbox");
//! let mut session = runner.open("/var/lib/strata/builds/x/rootfs".as_ref()).await?;
//! session
//!     .execute("apk add curl", &mut std::io::stderr(), &CancellationToken::new())
//!     .await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod protocol;
mod runner;
mod session;

pub use error::{Result, SandboxError};
pub use protocol::{HostMessage, SandboxMessage};
pub use runner::{ProcessRunner, SandboxRunner};
pub use session::SandboxSession;
