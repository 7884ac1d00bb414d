//! strata entry point.
//!
//! ```text
//! strata build [--rebuild] FILE...   build spec files in order
//! strata rm REF...                   remove builds, children first
//! strata gc [--dry-run]              drop builds that never got a manifest
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG`. Build IDs go to stdout.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::StrataConfig;
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::{
    collect_garbage, remove_builds, BaseInitializer, Builder, DirectoryInitializer,
    ScratchInitializer,
};
use strata_sandbox::ProcessRunner;
use strata_store::{DirDriver, StorageDriver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// strata - layered filesystem image builder
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build spec files, stopping at the first failure
    Build {
        /// Spec files to build
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Rebuild bases even when they are already stored
        #[arg(long)]
        rebuild: bool,
    },

    /// Remove builds by ID or name[:tag]
    Rm {
        /// Builds to remove
        #[arg(required = true)]
        refs: Vec<String>,
    },

    /// Remove builds left behind by interrupted runs
    Gc {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = StrataConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");

    let driver = Arc::new(
        DirDriver::open(&config.root)
            .await
            .with_context(|| format!("opening storage at {}", config.root.display()))?,
    );

    match cli.command {
        Commands::Build { files, rebuild } => {
            config.rebuild |= rebuild;
            config.validate_warn();
            cmd_build(&config, driver, &files).await
        }
        Commands::Rm { refs } => cmd_rm(driver.as_ref(), &refs).await,
        Commands::Gc { dry_run } => cmd_gc(driver.as_ref(), dry_run).await,
    }
}

async fn cmd_build(config: &StrataConfig, driver: Arc<DirDriver>, files: &[PathBuf]) -> anyhow::Result<()> {
    let initializer: Arc<dyn BaseInitializer> = match &config.seed {
        Some(seed) => Arc::new(DirectoryInitializer::new(seed)),
        None => Arc::new(ScratchInitializer),
    };
    let runner = Arc::new(ProcessRunner::new(&config.sandbox));

    let mut builder = Builder::new(driver, runner, config.builder_config()?)
        .with_initializer(initializer);

    let cancel = builder.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received interrupt, cancelling build");
            cancel.cancel();
        }
    });

    for file in files {
        let id = builder
            .build_file(file)
            .await
            .with_context(|| format!("building {}", file.display()))?;
        println!("{id}");
    }
    Ok(())
}

async fn cmd_rm(driver: &dyn StorageDriver, refs: &[String]) -> anyhow::Result<()> {
    let mut selected = Vec::with_capacity(refs.len());
    for reference in refs {
        let id = driver
            .resolve(reference)
            .await
            .with_context(|| format!("resolving {reference}"))?;
        selected.push(id);
    }

    let report = remove_builds(driver, &selected).await?;
    for id in &report.removed {
        println!("{id}");
    }
    for (id, e) in &report.failed {
        tracing::error!(build_id = %id, error = %e, "Could not remove build");
    }
    if !report.is_complete() {
        anyhow::bail!("{} build(s) could not be removed", report.failed.len());
    }
    Ok(())
}

async fn cmd_gc(driver: &dyn StorageDriver, dry_run: bool) -> anyhow::Result<()> {
    let result = collect_garbage(driver, dry_run).await?;
    for id in &result.orphans {
        println!("{id}");
    }
    if !result.removal.is_complete() {
        anyhow::bail!(
            "{} orphaned build(s) could not be removed",
            result.removal.failed.len()
        );
    }
    Ok(())
}
