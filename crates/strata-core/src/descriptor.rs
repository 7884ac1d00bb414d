//! In-memory image descriptors and their commands.

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use strata_store::{validate_name, BootEntry, BuildKey, Tag};

/// Capabilities a command may use while a layer is being built.
#[async_trait]
pub trait BuildContext: Send {
    /// Append configuration strings to the build's params.
    fn add_params(&mut self, params: &[String]);

    /// Append a boot menu entry.
    fn add_boot(&mut self, entry: BootEntry);

    /// Execute a shell command against the layer root and wait for it.
    async fn run(&mut self, command: &str) -> Result<()>;
}

/// A single step of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Base image reference. Only valid as the first command.
    From(BuildKey),
    /// Configuration strings appended to the inherited params.
    Params(Vec<String>),
    /// Shell command run inside the sandbox.
    Run(String),
    /// Boot menu entry.
    Boot(BootEntry),
}

impl Command {
    /// Grammar keyword for this command.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::From(_) => "FROM",
            Command::Params(_) => "PARAMS",
            Command::Run(_) => "RUN",
            Command::Boot(_) => "BOOT",
        }
    }

    /// Apply the command to a build context.
    ///
    /// `From` is consumed by base resolution before any command is applied,
    /// so reaching it here means it was misplaced.
    pub async fn apply(&self, ctx: &mut dyn BuildContext) -> Result<()> {
        match self {
            Command::From(key) => Err(BuildError::MisplacedFrom(key.clone())),
            Command::Params(params) => {
                ctx.add_params(params);
                Ok(())
            }
            Command::Run(command) => ctx.run(command).await,
            Command::Boot(entry) => {
                ctx.add_boot(entry.clone());
                Ok(())
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())?;
        match self {
            Command::From(key) => write!(f, " {key}"),
            Command::Params(params) => write!(f, " {}", params.join(" ")),
            Command::Run(command) => write!(f, " {command}"),
            Command::Boot(entry) => {
                write!(f, " {}", entry.title)?;
                entry.params.iter().try_for_each(|p| write!(f, " {p}"))
            }
        }
    }
}

/// Unbuilt image specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Image name.
    pub name: String,
    /// Tags to apply once built.
    pub tags: Vec<Tag>,
    /// Ordered command sequence.
    pub commands: Vec<Command>,
}

impl Descriptor {
    /// Descriptor tagged `latest` with no commands.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: vec![Tag::latest()],
            commands: Vec::new(),
        }
    }

    /// Zero-command base descriptor for a key.
    pub fn base(key: &BuildKey) -> Self {
        Self {
            name: key.name().to_string(),
            tags: vec![key.tag().clone()],
            commands: Vec::new(),
        }
    }

    /// Replace the tag list.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Append a command.
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Whether this is a base image (no commands).
    pub fn is_base(&self) -> bool {
        self.commands.is_empty()
    }

    /// Validate the name and produce one key per tag.
    pub fn keys(&self) -> Result<Vec<BuildKey>> {
        validate_name(&self.name)?;
        self.tags
            .iter()
            .map(|tag| BuildKey::new(self.name.clone(), tag.clone()).map_err(BuildError::from))
            .collect()
    }
}

/// Registered descriptors used when a base is neither stored nor on disk.
#[derive(Debug, Clone, Default)]
pub struct Repository {
    descriptors: HashMap<BuildKey, Descriptor>,
}

impl Repository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under each of its keys.
    pub fn register(&mut self, descriptor: Descriptor) -> Result<()> {
        for key in descriptor.keys()? {
            tracing::debug!(key = %key, "Registered descriptor");
            self.descriptors.insert(key, descriptor.clone());
        }
        Ok(())
    }

    /// Look up the descriptor registered for `key`.
    pub fn get(&self, key: &BuildKey) -> Option<&Descriptor> {
        self.descriptors.get(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no descriptor is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
