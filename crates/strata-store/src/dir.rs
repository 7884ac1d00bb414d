//! Directory-tree storage backend.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//! ├── .tmp/                    staging area for snapshots
//! └── builds/<build-id>/
//!     ├── layer.json           name, storage-level origin, sealed flag
//!     ├── manifest.json        BuildInfo (written once the build succeeds)
//!     ├── rootfs/              writable root
//!     └── snapshot/            sealed copy, the clone source
//! ```
//!
//! Cloning copies the source snapshot into the child's root. The child
//! records its origin in `layer.json`, which is what [`DirDriver::drop_build`]
//! consults to refuse destroying a parent with live dependents.

use crate::driver::{detach_key, Layer, StorageDriver};
use crate::error::{Result, StoreError};
use crate::id::{BuildId, BuildKey, Tag};
use crate::manifest::BuildInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

const BUILDS_DIR: &str = "builds";
const STAGING_DIR: &str = ".tmp";
const LAYER_FILE: &str = "layer.json";
const MANIFEST_FILE: &str = "manifest.json";
const ROOTFS_DIR: &str = "rootfs";
const SNAPSHOT_DIR: &str = "snapshot";

/// Storage-level state of a layer, independent of its manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayerState {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<BuildId>,
    #[serde(default)]
    sealed: bool,
}

/// Storage driver keeping every build in its own directory.
#[derive(Debug, Clone)]
pub struct DirDriver {
    root: PathBuf,
}

impl DirDriver {
    /// Open (and create if needed) a storage root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(BUILDS_DIR)).await?;
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        tracing::debug!(root = %root.display(), "Opened layer storage");
        Ok(Self { root })
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writable root of a build (exists for every stored build).
    pub fn rootfs_path(&self, id: &BuildId) -> PathBuf {
        self.build_dir(id).join(ROOTFS_DIR)
    }

    /// Sealed snapshot of a build (exists only for finalized cloneable builds).
    pub fn snapshot_path(&self, id: &BuildId) -> PathBuf {
        self.build_dir(id).join(SNAPSHOT_DIR)
    }

    fn build_dir(&self, id: &BuildId) -> PathBuf {
        self.root.join(BUILDS_DIR).join(id.as_str())
    }

    async fn read_state(&self, id: &BuildId) -> Result<LayerState> {
        let path = self.build_dir(id).join(LAYER_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_state(&self, id: &BuildId, state: &LayerState) -> Result<()> {
        let path = self.build_dir(id).join(LAYER_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(state)?).await
    }

    /// Allocate the directory for a new layer, refusing to reuse an ID.
    async fn allocate(&self, id: &BuildId, state: &LayerState) -> Result<PathBuf> {
        let dir = self.build_dir(id);
        if fs::try_exists(&dir).await? {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        let rootfs = dir.join(ROOTFS_DIR);
        fs::create_dir_all(&rootfs).await?;
        self.write_state(id, state).await?;
        Ok(rootfs)
    }

    async fn children_of(&self, id: &BuildId) -> Result<Vec<BuildId>> {
        let mut children = Vec::new();
        for other in self.builds().await? {
            if &other == id {
                continue;
            }
            match self.read_state(&other).await {
                Ok(state) if state.origin.as_ref() == Some(id) => children.push(other),
                Ok(_) => {}
                // A half-created directory without state cannot be a child yet.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl StorageDriver for DirDriver {
    async fn create_empty(&self, name: &str, id: &BuildId) -> Result<Layer> {
        let state = LayerState {
            name: name.to_string(),
            origin: None,
            sealed: false,
        };
        let rootfs = self.allocate(id, &state).await?;
        tracing::debug!(build_id = %id, name, "Created empty layer");
        Ok(Layer::new(id.clone(), name, rootfs))
    }

    async fn clone_layer(&self, src: &BuildId, name: &str, dst: &BuildId) -> Result<Layer> {
        let start = std::time::Instant::now();
        let snapshot = self.snapshot_path(src);
        if !fs::try_exists(&snapshot).await? {
            return Err(StoreError::SourceNotFound(src.clone()));
        }

        // Origin is recorded before copying so the source cannot be dropped
        // from under an in-flight clone.
        let state = LayerState {
            name: name.to_string(),
            origin: Some(src.clone()),
            sealed: false,
        };
        let rootfs = self.allocate(dst, &state).await?;

        if let Err(e) = copy_tree(snapshot, rootfs.clone()).await {
            tracing::warn!(src = %src, dst = %dst, error = %e, "Clone copy failed, removing layer");
            if let Err(cleanup) = fs::remove_dir_all(self.build_dir(dst)).await {
                tracing::warn!(build_id = %dst, error = %cleanup, "Failed to remove partial clone");
            }
            return Err(e);
        }

        tracing::debug!(
            src = %src,
            dst = %dst,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cloned layer"
        );
        Ok(Layer::new(dst.clone(), name, rootfs))
    }

    async fn finalize(&self, layer: Layer) -> Result<()> {
        let id = layer.id().clone();
        let mut state = self.read_state(&id).await?;

        if id.build_type().cloneable() {
            let staging = self.root.join(STAGING_DIR).join(format!("{id}-{SNAPSHOT_DIR}"));
            if fs::try_exists(&staging).await? {
                fs::remove_dir_all(&staging).await?;
            }
            copy_tree(layer.path().to_path_buf(), staging.clone()).await?;
            let snapshot = self.snapshot_path(&id);
            if fs::try_exists(&snapshot).await? {
                fs::remove_dir_all(&snapshot).await?;
            }
            fs::rename(&staging, &snapshot).await?;
            tracing::debug!(build_id = %id.short(), name = layer.name(), "Sealed layer snapshot");
        } else {
            tracing::debug!(
                build_id = %id.short(),
                name = layer.name(),
                build_type = %id.build_type(),
                "Finalized without snapshot"
            );
        }

        state.sealed = true;
        self.write_state(&id, &state).await
    }

    async fn info(&self, id: &BuildId) -> Result<BuildInfo> {
        let path = self.build_dir(id).join(MANIFEST_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn builds(&self) -> Result<Vec<BuildId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join(BUILDS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            match name.to_str().map(str::parse::<BuildId>) {
                Some(Ok(id)) => ids.push(id),
                _ => tracing::trace!(entry = ?name, "Skipping foreign entry in storage"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn build_id(&self, key: &BuildKey) -> Result<BuildId> {
        for id in self.builds().await? {
            match self.info(&id).await {
                Ok(info) if info.has_key(key) => return Ok(id),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::KeyNotFound(key.clone()))
    }

    async fn store_manifest(&self, info: &BuildInfo) -> Result<()> {
        let dir = self.build_dir(&info.id);
        if !fs::try_exists(&dir).await? {
            return Err(StoreError::NotFound(info.id.clone()));
        }
        write_atomic(&dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(info)?).await
    }

    async fn tag(&self, id: &BuildId, tag: &Tag) -> Result<()> {
        let mut info = self.info(id).await?;
        let key = BuildKey::new(info.name.clone(), tag.clone())?;
        // Only other builds are untagged here, so `info` stays current.
        detach_key(self, &key, id).await?;

        if info.tags.insert(tag.clone()) {
            self.store_manifest(&info).await?;
        }
        tracing::debug!(build_id = %id, key = %key, "Tagged build");
        Ok(())
    }

    async fn untag(&self, id: &BuildId, tag: &Tag) -> Result<()> {
        let mut info = self.info(id).await?;
        if info.tags.remove(tag) {
            self.store_manifest(&info).await?;
            tracing::debug!(build_id = %id, tag = %tag, "Untagged build");
        }
        Ok(())
    }

    async fn drop_build(&self, id: &BuildId) -> Result<()> {
        let dir = self.build_dir(id);
        if !fs::try_exists(&dir).await? {
            return Err(StoreError::NotFound(id.clone()));
        }
        let children = self.children_of(id).await?;
        if !children.is_empty() {
            return Err(StoreError::HasChildren {
                id: id.clone(),
                count: children.len(),
            });
        }
        fs::remove_dir_all(&dir).await?;
        tracing::info!(build_id = %id, "Dropped build");
        Ok(())
    }
}

/// Write through a sibling temp file and rename into place.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Recursively copy `src` into `dst` on a blocking task, preserving symlinks
/// and permissions. Returns the number of non-directory entries copied.
///
/// Symlinks are an error on platforms without them.
pub async fn copy_tree(src: PathBuf, dst: PathBuf) -> Result<usize> {
    let copied = tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dst))
        .await
        .map_err(io::Error::other)??;
    Ok(copied)
}

fn copy_tree_blocking(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            std::fs::set_permissions(&target, entry.metadata()?.permissions())?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            {
                std::os::unix::fs::symlink(&link, &target)?;
                copied += 1;
            }
            #[cfg(not(unix))]
            return Err(io::Error::other(format!(
                "cannot copy symlink {} -> {}",
                entry.path().display(),
                link.display()
            )));
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
