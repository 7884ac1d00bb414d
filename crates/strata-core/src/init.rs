//! Base image initializers.
//!
//! A base image is a descriptor with no commands. Its root starts empty and
//! is populated by a [`BaseInitializer`] before being sealed.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use strata_store::{copy_tree, BuildKey, StoreError};

/// Populates an empty root with base content.
#[async_trait]
pub trait BaseInitializer: Send + Sync {
    /// Fill `path` with the content for `key`.
    async fn init(&self, cache_dir: &Path, path: &Path, key: &BuildKey) -> Result<()>;
}

/// Leaves base roots empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchInitializer;

#[async_trait]
impl BaseInitializer for ScratchInitializer {
    async fn init(&self, _cache_dir: &Path, path: &Path, key: &BuildKey) -> Result<()> {
        tracing::info!(key = %key, path = %path.display(), "Initialized empty base image");
        Ok(())
    }
}

/// Copies base content from a local seed tree laid out as `<seed>/<name>/<tag>/`.
#[derive(Debug, Clone)]
pub struct DirectoryInitializer {
    seed: PathBuf,
}

impl DirectoryInitializer {
    /// Initializer reading from `seed`.
    pub fn new(seed: impl Into<PathBuf>) -> Self {
        Self { seed: seed.into() }
    }

    /// Seed directory for a key.
    pub fn source(&self, key: &BuildKey) -> PathBuf {
        self.seed.join(key.name()).join(key.tag().as_str())
    }
}

#[async_trait]
impl BaseInitializer for DirectoryInitializer {
    async fn init(&self, _cache_dir: &Path, path: &Path, key: &BuildKey) -> Result<()> {
        let source = self.source(key);
        if !tokio::fs::try_exists(&source).await? {
            return Err(StoreError::KeyNotFound(key.clone()).into());
        }

        let start = std::time::Instant::now();
        let files = copy_tree(source.clone(), path.to_path_buf()).await?;

        tracing::info!(
            key = %key,
            source = %source.display(),
            files,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Initialized base image from seed"
        );
        Ok(())
    }
}
