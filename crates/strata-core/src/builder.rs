//! Build orchestrator.
//!
//! Turns a [`Descriptor`] into a stored, tagged build:
//!
//! ```text
//! validate keys ─► allocate ID ─► acquire layer ─► populate ─► finalize ─► manifest ─► tags ─► ready
//!                                  │                 │
//!                                  │                 └─ RUN/PARAMS/BOOT against the layer
//!                                  └─ base: create_empty, other: resolve FROM and clone
//! ```
//!
//! Any failure after allocation finalizes the partial layer and drops the
//! build, so an abandoned ID never stays in storage.

use crate::config::BuilderConfig;
use crate::context::SandboxContext;
use crate::descriptor::{Command, Descriptor, Repository};
use crate::error::{BuildError, Result};
use crate::init::{BaseInitializer, ScratchInitializer};
use crate::parser;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use strata_sandbox::SandboxRunner;
use strata_store::{detach_key, BuildId, BuildInfo, BuildKey, BuildType, Layer, StorageDriver, Tag};
use tokio_util::sync::CancellationToken;

/// Keys being built on the current recursion branch.
type Stack = HashSet<BuildKey>;

/// Drives storage and sandbox to produce builds.
///
/// One `Builder` corresponds to one invocation: keys built through it are
/// remembered as ready and never rebuilt by the same instance.
pub struct Builder {
    driver: Arc<dyn StorageDriver>,
    runner: Arc<dyn SandboxRunner>,
    initializer: Arc<dyn BaseInitializer>,
    repository: Repository,
    config: BuilderConfig,
    cancel: CancellationToken,
    log: Box<dyn Write + Send + Sync>,
    ready: HashSet<BuildKey>,
}

impl Builder {
    /// Create a builder with an empty repository, scratch base images and
    /// sandbox output forwarded to stderr.
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        runner: Arc<dyn SandboxRunner>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            driver,
            runner,
            initializer: Arc::new(ScratchInitializer),
            repository: Repository::new(),
            config,
            cancel: CancellationToken::new(),
            log: Box::new(std::io::stderr()),
            ready: HashSet::new(),
        }
    }

    /// Use `initializer` to populate base images.
    pub fn with_initializer(mut self, initializer: Arc<dyn BaseInitializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Fall back to `repository` for bases without a stored build or spec file.
    pub fn with_repository(mut self, repository: Repository) -> Self {
        self.repository = repository;
        self
    }

    /// Forward sandbox output to `log`.
    pub fn with_log(mut self, log: Box<dyn Write + Send + Sync>) -> Self {
        self.log = log;
        self
    }

    /// Observe `cancel` for cooperative cancellation.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels builds driven by this builder.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Whether `key` was built by this builder.
    pub fn is_ready(&self, key: &BuildKey) -> bool {
        self.ready.contains(key)
    }

    /// Build a descriptor, recursively satisfying its FROM chain.
    pub async fn build(&mut self, descriptor: &Descriptor) -> Result<BuildId> {
        self.build_inner(descriptor, &Stack::new()).await
    }

    /// Parse a spec file and build it.
    pub async fn build_file(&mut self, path: &Path) -> Result<BuildId> {
        self.build_file_inner(path, &Stack::new()).await
    }

    /// Build spec files in order, stopping at the first failure.
    pub async fn build_files(&mut self, paths: &[PathBuf]) -> Result<Vec<BuildId>> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            ids.push(self.build_file(path).await?);
        }
        Ok(ids)
    }

    fn build_file_inner<'a>(
        &'a mut self,
        path: &'a Path,
        stack: &'a Stack,
    ) -> BoxFuture<'a, Result<BuildId>> {
        Box::pin(async move {
            let owned = path.to_path_buf();
            let descriptor = tokio::task::spawn_blocking(move || parser::parse_file(&owned))
                .await
                .map_err(std::io::Error::other)??;
            self.build_inner(&descriptor, stack).await
        })
    }

    fn build_inner<'a>(
        &'a mut self,
        descriptor: &'a Descriptor,
        stack: &'a Stack,
    ) -> BoxFuture<'a, Result<BuildId>> {
        Box::pin(async move {
            let keys = descriptor.keys()?;
            if let Some(key) = keys.iter().find(|key| stack.contains(key)) {
                tracing::warn!(key = %key, "Dependency cycle detected");
                return Err(BuildError::DependencyCycle(key.clone()));
            }

            if descriptor.is_base() {
                if keys.len() != 1 {
                    return Err(BuildError::BaseTagCount {
                        name: descriptor.name.clone(),
                        count: keys.len(),
                    });
                }
                if let Some(id) = self.lookup(&keys[0]).await? {
                    tracing::debug!(key = %keys[0], build_id = %id, "Reusing stored base image");
                    return Ok(id);
                }
            }

            let mut branch = stack.clone();
            branch.extend(keys.iter().cloned());

            let id = BuildId::new(BuildType::Image);
            let start = Instant::now();
            tracing::info!(build_id = %id, name = %descriptor.name, "Building image");

            let (layer, base) = match self.acquire(descriptor, &keys, &id, &branch).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    self.discard(&id, None).await;
                    return Err(e);
                }
            };

            let info = match self.populate(descriptor, &keys, &layer, base).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(build_id = %id, error = %e, "Build failed, discarding layer");
                    self.discard(&id, Some(layer)).await;
                    return Err(e);
                }
            };

            if let Err(e) = self.commit(layer, &info, descriptor).await {
                tracing::warn!(build_id = %id, error = %e, "Failed to commit build, discarding");
                self.discard(&id, None).await;
                return Err(e);
            }
            self.ready.extend(keys);

            tracing::info!(
                build_id = %id,
                name = %descriptor.name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Built image"
            );
            Ok(id)
        })
    }

    /// Stored build for `key` when reuse is allowed.
    async fn lookup(&self, key: &BuildKey) -> Result<Option<BuildId>> {
        if self.config.rebuild && !self.ready.contains(key) {
            return Ok(None);
        }
        match self.driver.build_id(key).await {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the writable layer for `id`, returning the base manifest for
    /// non-base descriptors.
    async fn acquire(
        &mut self,
        descriptor: &Descriptor,
        keys: &[BuildKey],
        id: &BuildId,
        branch: &Stack,
    ) -> Result<(Layer, Option<BuildInfo>)> {
        if descriptor.is_base() {
            let layer = self.driver.create_empty(&descriptor.name, id).await?;
            return Ok((layer, None));
        }

        let Some(Command::From(from)) = descriptor.commands.first() else {
            return Err(BuildError::MissingFromCommand(descriptor.name.clone()));
        };
        tracing::debug!(keys = ?keys, from = %from, "Resolving base image");

        let base_id = self.resolve_base(from, branch).await?;
        if !base_id.build_type().cloneable() {
            return Err(BuildError::NotCloneable(base_id));
        }
        let base = self.driver.info(&base_id).await?;
        let layer = self.driver.clone_layer(&base_id, &descriptor.name, id).await?;
        Ok((layer, Some(base)))
    }

    /// Resolve a FROM reference, building it if needed.
    ///
    /// Tried in order: stored build, sibling spec file (default tag only),
    /// registered descriptor, synthesized empty base.
    fn resolve_base<'a>(
        &'a mut self,
        key: &'a BuildKey,
        stack: &'a Stack,
    ) -> BoxFuture<'a, Result<BuildId>> {
        Box::pin(async move {
            if let Some(id) = self.lookup(key).await? {
                tracing::debug!(key = %key, build_id = %id, "Base found in storage");
                return Ok(id);
            }

            if key.tag().is_default() {
                let path = self.config.spec_path(key.name());
                if tokio::fs::try_exists(&path).await? {
                    tracing::debug!(key = %key, path = %path.display(), "Building base from spec file");
                    return self.build_file_inner(&path, stack).await;
                }
            }

            if let Some(descriptor) = self.repository.get(key).cloned() {
                tracing::debug!(key = %key, "Building base from repository");
                return self.build_inner(&descriptor, stack).await;
            }

            tracing::debug!(key = %key, "Synthesizing base image");
            self.build_inner(&Descriptor::base(key), stack).await
        })
    }

    /// Run the descriptor's content steps against the layer.
    async fn populate(
        &mut self,
        descriptor: &Descriptor,
        keys: &[BuildKey],
        layer: &Layer,
        base: Option<BuildInfo>,
    ) -> Result<BuildInfo> {
        let Some(base) = base else {
            self.initializer
                .init(&self.config.cache_dir, layer.path(), &keys[0])
                .await?;
            return Ok(BuildInfo::new(layer.id().clone(), &descriptor.name, None));
        };

        let mut ctx = SandboxContext::new(
            self.runner.as_ref(),
            layer.path(),
            &mut *self.log,
            &self.cancel,
            base.params.clone(),
        );
        for command in &descriptor.commands[1..] {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            tracing::debug!(build_id = %layer.id(), command = %command, "Applying command");
            command.apply(&mut ctx).await?;
        }

        let (params, boots) = ctx.into_parts();
        let mut info = BuildInfo::new(layer.id().clone(), &descriptor.name, Some(base.id));
        info.params = params;
        info.boots = boots;
        Ok(info)
    }

    /// Seal the layer, persist its manifest and apply its tags.
    ///
    /// Tags moved off earlier builds are handed back if a later tag fails.
    async fn commit(&self, layer: Layer, info: &BuildInfo, descriptor: &Descriptor) -> Result<()> {
        self.driver.finalize(layer).await?;
        self.driver.store_manifest(info).await?;

        let mut moved = Vec::new();
        if let Err(e) = self.apply_tags(info, &descriptor.tags, &mut moved).await {
            self.restore_tags(&moved).await;
            return Err(e);
        }
        Ok(())
    }

    /// Tag `info.id`, recording each `(previous owner, tag)` pair detached.
    async fn apply_tags(
        &self,
        info: &BuildInfo,
        tags: &[Tag],
        moved: &mut Vec<(BuildId, Tag)>,
    ) -> Result<()> {
        for tag in tags {
            let key = BuildKey::new(info.name.clone(), tag.clone())?;
            if let Some(owner) = detach_key(self.driver.as_ref(), &key, &info.id).await? {
                moved.push((owner, tag.clone()));
            }
            self.driver.tag(&info.id, tag).await?;
        }
        Ok(())
    }

    /// Reattach tags to the builds they were moved from.
    async fn restore_tags(&self, moved: &[(BuildId, Tag)]) {
        for (owner, tag) in moved.iter().rev() {
            match self.driver.tag(owner, tag).await {
                Ok(()) => tracing::debug!(build_id = %owner.short(), tag = %tag, "Restored tag"),
                Err(e) => tracing::warn!(
                    build_id = %owner,
                    tag = %tag,
                    error = %e,
                    "Failed to restore tag"
                ),
            }
        }
    }

    /// Release a failed build. Errors here are logged, never returned, so
    /// they cannot mask the failure that triggered the cleanup.
    async fn discard(&self, id: &BuildId, layer: Option<Layer>) {
        if let Some(layer) = layer {
            if let Err(e) = self.driver.finalize(layer).await {
                tracing::warn!(build_id = %id, error = %e, "Failed to finalize discarded layer");
            }
        }
        match self.driver.drop_build(id).await {
            Ok(()) => tracing::debug!(build_id = %id, "Dropped failed build"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(build_id = %id, error = %e, "Failed to drop failed build"),
        }
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("repository", &self.repository.len())
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}
