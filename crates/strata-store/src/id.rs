//! Build identities: [`BuildId`], [`BuildType`], [`Tag`] and [`BuildKey`].
//!
//! A build ID is `<prefix><payload><checksum>`:
//!
//! ```text
//!  i 3f2a...(32 hex)... 9c01d2e4
//!  │ └─ 16 random bytes  └─ first 4 bytes of sha256(prefix + payload)
//!  └─ build type
//! ```
//!
//! The checksum lets any string be validated without touching storage.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

/// Tag applied when a reference or descriptor does not name one.
pub const DEFAULT_TAG: &str = "latest";

const PAYLOAD_LEN: usize = 32;
const CHECKSUM_LEN: usize = 8;
/// Length of a build ID string.
pub const BUILD_ID_LEN: usize = 1 + PAYLOAD_LEN + CHECKSUM_LEN;

static NAME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("valid regex"));

static TAG_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex")
});

/// Kind of stored build. Gates what the storage layer allows on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildType {
    /// Layered image, the only clone source.
    Image,
    /// Writable mount derived from an image.
    Mount,
    /// Bootable volume.
    Boot,
    /// Root volume of a running virtual machine.
    Vm,
}

impl BuildType {
    /// Single-character prefix used in the ID string.
    pub fn prefix(self) -> char {
        match self {
            Self::Image => 'i',
            Self::Mount => 'm',
            Self::Boot => 'b',
            Self::Vm => 'v',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::Image),
            'm' => Some(Self::Mount),
            'b' => Some(Self::Boot),
            'v' => Some(Self::Vm),
            _ => None,
        }
    }

    /// Whether finalizing produces a snapshot other builds can clone from.
    pub fn cloneable(self) -> bool {
        matches!(self, Self::Image)
    }

    /// Whether the build is meant to be mounted and written after finalize.
    pub fn mountable(self) -> bool {
        matches!(self, Self::Mount | Self::Boot | Self::Vm)
    }

    /// Whether the build backs a virtual machine.
    pub fn is_vm(self) -> bool {
        matches!(self, Self::Vm)
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Mount => write!(f, "mount"),
            Self::Boot => write!(f, "boot"),
            Self::Vm => write!(f, "vm"),
        }
    }
}

/// Globally unique, self-validating identifier of a stored build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildId(String);

impl BuildId {
    /// Generate a fresh ID of the given type.
    pub fn new(build_type: BuildType) -> Self {
        let prefix = build_type.prefix();
        let payload = hex::encode(Uuid::new_v4().as_bytes());
        let checksum = checksum(prefix, &payload);
        Self(format!("{prefix}{payload}{checksum}"))
    }

    /// Check whether `s` is a well-formed ID with a matching checksum.
    pub fn is_valid(s: &str) -> bool {
        if s.len() != BUILD_ID_LEN || !s.is_ascii() {
            return false;
        }
        let mut chars = s.chars();
        let Some(prefix) = chars.next() else {
            return false;
        };
        if BuildType::from_prefix(prefix).is_none() {
            return false;
        }
        let body = &s[1..];
        if !body.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return false;
        }
        let (payload, sum) = body.split_at(PAYLOAD_LEN);
        checksum(prefix, payload) == sum
    }

    /// Type encoded in the prefix.
    pub fn build_type(&self) -> BuildType {
        self.0
            .chars()
            .next()
            .and_then(BuildType::from_prefix)
            .unwrap_or(BuildType::Image)
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines and listings.
    pub fn short(&self) -> &str {
        &self.0[..13]
    }
}

fn checksum(prefix: char, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update([prefix as u8]);
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..CHECKSUM_LEN / 2])
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BuildId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(StoreError::InvalidBuildId(s.to_string()))
        }
    }
}

impl TryFrom<String> for BuildId {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(StoreError::InvalidBuildId(s))
        }
    }
}

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

/// Validate an image name.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Short mutable label attached to a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Validate and wrap a tag.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if TAG_PATTERN.is_match(&tag) {
            Ok(Self(tag))
        } else {
            Err(StoreError::InvalidTag(tag))
        }
    }

    /// The `latest` tag.
    pub fn latest() -> Self {
        Self(DEFAULT_TAG.to_string())
    }

    /// Whether this is the default tag.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_TAG
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

/// Human-facing `(name, tag)` reference to at most one build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildKey {
    name: String,
    tag: Tag,
}

impl BuildKey {
    /// Create a key, validating the name.
    pub fn new(name: impl Into<String>, tag: Tag) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, tag })
    }

    /// Image name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag.
    pub fn tag(&self) -> &Tag {
        &self.tag
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for BuildKey {
    type Err = StoreError;

    /// Parse `name[:tag]`; a missing tag means `latest`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((name, tag)) => Self::new(name, Tag::new(tag)?),
            None => Self::new(s, Tag::latest()),
        }
    }
}
