//! Persisted build metadata.

use crate::id::{BuildId, BuildKey, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Boot menu entry carried by bootable builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntry {
    /// Menu title.
    pub title: String,
    /// Kernel command line parameters.
    #[serde(default)]
    pub params: Vec<String>,
}

/// Manifest attached to a stored build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Identity of the build.
    pub id: BuildId,
    /// Image name.
    pub name: String,
    /// Build this one was cloned from (`None` for base images).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on: Option<BuildId>,
    /// Tags currently pointing at this build.
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Configuration strings inherited and appended along the chain.
    #[serde(default)]
    pub params: Vec<String>,
    /// Boot menu entries.
    #[serde(default)]
    pub boots: Vec<BootEntry>,
}

impl BuildInfo {
    /// Create an untagged manifest stamped with the current time.
    pub fn new(id: BuildId, name: impl Into<String>, based_on: Option<BuildId>) -> Self {
        Self {
            id,
            name: name.into(),
            based_on,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            params: Vec::new(),
            boots: Vec::new(),
        }
    }

    /// Whether this build answers to `key`.
    pub fn has_key(&self, key: &BuildKey) -> bool {
        self.name == key.name() && self.tags.contains(key.tag())
    }

    /// Keys currently resolving to this build.
    pub fn keys(&self) -> Vec<BuildKey> {
        self.tags
            .iter()
            .filter_map(|tag| BuildKey::new(self.name.clone(), tag.clone()).ok())
            .collect()
    }
}
