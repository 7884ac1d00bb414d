//! # strata-core
//!
//! Build orchestration for layered filesystem images.
//!
//! A [`Descriptor`] (usually parsed from a `.strata` spec file) names an
//! image, its tags and an ordered command list. The [`Builder`] resolves the
//! descriptor's FROM chain, clones the base layer, runs each RUN step in a
//! sandbox and stores the sealed, tagged result.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::{Builder, BuilderConfig};
//! use strata_sandbox::ProcessRunner;
//! use strata_store::DirDriver;
//!
//! # async fn example() -> strata_core::Result<()> {
//! let driver = Arc::new(DirDriver::open("/var/lib/strata").await?);
//! let runner = Arc::new(ProcessRunner::new("/usr/libexec/strata-sandbox"));
//! let config = BuilderConfig::builder().spec_dir("./specs").build()?;
//!
//! let mut builder = Builder::new(driver, runner, config);
//! let id = builder.build_file("./specs/web.strata".as_ref()).await?;
//! println!("built {id}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Recursive bases**: FROM targets are taken from storage, sibling spec
//!   files, a registered repository, or synthesized as empty bases
//! - **Cycle detection**: per-branch key stack, checked before any storage
//!   mutation
//! - **All-paths cleanup**: failed builds never leave a layer behind
//! - **Safe removal**: batches are dropped children first

mod builder;
mod config;
mod context;
mod descriptor;
mod error;
mod init;
pub mod parser;
mod removal;

pub use builder::Builder;
pub use config::{BuilderConfig, BuilderConfigBuilder, SPEC_EXTENSION};
pub use context::SandboxContext;
pub use descriptor::{BuildContext, Command, Descriptor, Repository};
pub use error::{BuildError, Result};
pub use init::{BaseInitializer, DirectoryInitializer, ScratchInitializer};
pub use removal::{collect_garbage, plan_removal, remove_builds, GcResult, GcStats, RemovalReport};
