//! Configuration for the strata binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::path::PathBuf;
use strata_core::BuilderConfig;

/// Runtime configuration for one `strata` invocation.
#[derive(Debug, Clone)]
pub struct StrataConfig {
    /// Layer storage root.
    pub root: PathBuf,

    /// Cache directory handed to the base initializer.
    pub cache_dir: PathBuf,

    /// Sandbox program used for RUN steps.
    pub sandbox: PathBuf,

    /// Seed tree for base images (`<seed>/<name>/<tag>/`); empty bases if unset.
    pub seed: Option<PathBuf>,

    /// Rebuild bases even when stored (default: false).
    pub rebuild: bool,

    /// Directory searched for base spec files (default: `.`).
    pub spec_dir: PathBuf,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/strata"),
            cache_dir: PathBuf::from("/var/cache/strata"),
            sandbox: PathBuf::from("/usr/libexec/strata-sandbox"),
            seed: None,
            rebuild: false,
            spec_dir: PathBuf::from("."),
        }
    }
}

impl StrataConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STRATA_ROOT` | `/var/lib/strata` |
    /// | `STRATA_CACHE` | `/var/cache/strata` |
    /// | `STRATA_SANDBOX` | `/usr/libexec/strata-sandbox` |
    /// | `STRATA_SEED` | unset (empty base images) |
    /// | `STRATA_REBUILD` | `false` |
    /// | `STRATA_SPEC_DIR` | `.` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        Self {
            root: var("STRATA_ROOT").map(PathBuf::from).unwrap_or(default.root),
            cache_dir: var("STRATA_CACHE")
                .map(PathBuf::from)
                .unwrap_or(default.cache_dir),
            sandbox: var("STRATA_SANDBOX")
                .map(PathBuf::from)
                .unwrap_or(default.sandbox),
            seed: var("STRATA_SEED").filter(|v| !v.is_empty()).map(PathBuf::from),
            rebuild: var("STRATA_REBUILD")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.rebuild),
            spec_dir: var("STRATA_SPEC_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.spec_dir),
        }
    }

    /// Builder settings derived from this configuration.
    pub fn builder_config(&self) -> strata_core::Result<BuilderConfig> {
        BuilderConfig::builder()
            .rebuild(self.rebuild)
            .spec_dir(&self.spec_dir)
            .cache_dir(&self.cache_dir)
            .build()
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if !self.sandbox.exists() {
            tracing::warn!("Sandbox program not found: {:?}", self.sandbox);
        }

        if let Some(seed) = &self.seed {
            if !seed.is_dir() {
                tracing::warn!("Seed directory not found: {:?}", seed);
            }
        }

        if !self.spec_dir.is_dir() {
            tracing::warn!("Spec directory not found: {:?}", self.spec_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StrataConfig::from_lookup(|_| None);
        assert_eq!(config.root, PathBuf::from("/var/lib/strata"));
        assert!(config.seed.is_none());
        assert!(!config.rebuild);
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("STRATA_ROOT", "/srv/strata"),
            ("STRATA_SEED", "/srv/seed"),
            ("STRATA_REBUILD", "1"),
            ("STRATA_SPEC_DIR", "/srv/specs"),
        ]);
        let config = StrataConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.root, PathBuf::from("/srv/strata"));
        assert_eq!(config.seed, Some(PathBuf::from("/srv/seed")));
        assert!(config.rebuild);

        let builder = config.builder_config().unwrap();
        assert!(builder.rebuild);
        assert_eq!(builder.spec_path("alpine"), PathBuf::from("/srv/specs/alpine.strata"));
    }

    #[test]
    fn test_rebuild_parsing() {
        let config = StrataConfig::from_lookup(|key| (key == "STRATA_REBUILD").then(|| "yes".into()));
        assert!(!config.rebuild);
    }
}
