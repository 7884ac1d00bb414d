//! Backend-agnostic storage contract.

use crate::error::{Result, StoreError};
use crate::id::{BuildId, BuildKey, Tag};
use crate::manifest::BuildInfo;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A writable root handed out by [`StorageDriver::create_empty`] or
/// [`StorageDriver::clone_layer`].
///
/// The layer stays mutable and cannot be cloned from until it is passed to
/// [`StorageDriver::finalize`], which consumes it.
#[derive(Debug)]
#[must_use = "a layer must be finalized, even on failure paths"]
pub struct Layer {
    id: BuildId,
    name: String,
    path: PathBuf,
}

impl Layer {
    /// Create a layer handle. Only storage backends should need this.
    pub fn new(id: BuildId, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
        }
    }

    /// Build this layer belongs to.
    pub fn id(&self) -> &BuildId {
        &self.id
    }

    /// Image name the layer was created for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writable root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copy-on-write persistence backend.
///
/// Implementations must be safe for sequential reuse across recursive
/// builds. Cross-process locking is the caller's concern.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Allocate a fresh writable root with no parent.
    async fn create_empty(&self, name: &str, id: &BuildId) -> Result<Layer>;

    /// Create a writable child of `src`'s finalized state.
    ///
    /// Fails with [`StoreError::SourceNotFound`] if `src` was never sealed
    /// into a snapshot.
    async fn clone_layer(&self, src: &BuildId, name: &str, dst: &BuildId) -> Result<Layer>;

    /// Seal a layer. Cloneable builds gain an immutable snapshot; other
    /// builds stay writable.
    async fn finalize(&self, layer: Layer) -> Result<()>;

    /// Read a build's manifest.
    async fn info(&self, id: &BuildId) -> Result<BuildInfo>;

    /// List every stored build, with or without a manifest.
    async fn builds(&self) -> Result<Vec<BuildId>>;

    /// Resolve a key to the build currently carrying it.
    async fn build_id(&self, key: &BuildKey) -> Result<BuildId>;

    /// Persist a manifest for an existing build.
    async fn store_manifest(&self, info: &BuildInfo) -> Result<()>;

    /// Attach `tag`, detaching it from whichever build held it under the
    /// same name.
    async fn tag(&self, id: &BuildId, tag: &Tag) -> Result<()>;

    /// Detach `tag` from a build. Untagging a tag the build lacks is a no-op.
    async fn untag(&self, id: &BuildId, tag: &Tag) -> Result<()>;

    /// Destroy a build's storage.
    ///
    /// Fails with [`StoreError::HasChildren`] while other layers were cloned
    /// from it.
    async fn drop_build(&self, id: &BuildId) -> Result<()>;

    /// Resolve a user reference: either a build ID or `name[:tag]`.
    async fn resolve(&self, reference: &str) -> Result<BuildId> {
        if BuildId::is_valid(reference) {
            let id: BuildId = reference.parse()?;
            self.info(&id).await?;
            return Ok(id);
        }
        let key: BuildKey = reference.parse()?;
        self.build_id(&key).await
    }

    /// The `based_on` forest of all builds that carry a manifest.
    async fn parents(&self) -> Result<HashMap<BuildId, Option<BuildId>>> {
        let mut forest = HashMap::new();
        for id in self.builds().await? {
            match self.info(&id).await {
                Ok(info) => {
                    forest.insert(id, info.based_on);
                }
                Err(e) if e.is_not_found() => {
                    forest.insert(id, None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(forest)
    }
}

/// Detach `tag` from the current owner of `key` unless that owner is `id`.
///
/// Shared by backends to implement tag move semantics.
pub async fn detach_key<D: StorageDriver + ?Sized>(
    driver: &D,
    key: &BuildKey,
    id: &BuildId,
) -> Result<Option<BuildId>> {
    match driver.build_id(key).await {
        Ok(owner) if &owner != id => {
            tracing::debug!(key = %key, from = %owner, to = %id, "Moving tag");
            driver.untag(&owner, key.tag()).await?;
            Ok(Some(owner))
        }
        Ok(_) => Ok(None),
        Err(StoreError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
