//! Builder configuration.

use crate::error::{BuildError, Result};
use std::path::PathBuf;

/// Spec file extension used for sibling lookups.
pub const SPEC_EXTENSION: &str = "strata";

/// Configuration for one [`Builder`](crate::Builder) invocation.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Rebuild bases even when storage already holds them (default: false).
    pub rebuild: bool,
    /// Directory searched for `<name>.strata` base spec files (default: `.`).
    pub spec_dir: PathBuf,
    /// Cache directory handed to the base initializer.
    pub cache_dir: PathBuf,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            rebuild: false,
            spec_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("/var/cache/strata"),
        }
    }
}

impl BuilderConfig {
    /// Create a new config builder.
    pub fn builder() -> BuilderConfigBuilder {
        BuilderConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.spec_dir.as_os_str().is_empty() {
            return Err(BuildError::Config("spec_dir is required".into()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(BuildError::Config("cache_dir is required".into()));
        }
        Ok(())
    }

    /// Path of the sibling spec file for an image name.
    pub fn spec_path(&self, name: &str) -> PathBuf {
        self.spec_dir.join(format!("{name}.{SPEC_EXTENSION}"))
    }
}

/// Builder for BuilderConfig.
#[derive(Debug, Default)]
pub struct BuilderConfigBuilder {
    config: BuilderConfig,
}

impl BuilderConfigBuilder {
    /// Force bases to be rebuilt.
    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.config.rebuild = rebuild;
        self
    }

    /// Set the spec file directory.
    pub fn spec_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.spec_dir = path.into();
        self
    }

    /// Set the base initializer cache directory.
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = path.into();
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<BuilderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
