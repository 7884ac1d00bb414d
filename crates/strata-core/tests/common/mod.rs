//! Shared fixtures: a temp storage root, an in-process scripted sandbox and
//! a counting base initializer.
//!
//! The scripted sandbox understands a few commands:
//!
//! - `write <path> <content>`: write a file under the build root
//! - `fail <reason>`: log a line, then report failure
//! - `hang`: never answer
//! - `drop`: close the channel without a result
//! - anything else: log `ran <command>` and succeed

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strata_core::{BaseInitializer, Builder, BuilderConfig};
use strata_sandbox::protocol::encode;
use strata_sandbox::{HostMessage, SandboxMessage, SandboxRunner, SandboxSession};
use strata_store::{
    BuildId, BuildInfo, BuildKey, DirDriver, Layer, StorageDriver, StoreError, Tag,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxRunner for ScriptedRunner {
    async fn open(&self, root: &Path) -> strata_sandbox::Result<SandboxSession> {
        let (host, sandbox) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(sandbox, root.to_path_buf(), self.commands.clone()));
        let (read, write) = tokio::io::split(host);
        Ok(SandboxSession::new(read, write))
    }
}

async fn serve(stream: DuplexStream, root: PathBuf, commands: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let HostMessage::Execute { command } = serde_json::from_str(&line).unwrap();
        commands.lock().unwrap().push(command.clone());

        let Some(replies) = respond(&root, &command) else {
            return;
        };
        for reply in replies {
            if write.write_all(&encode(&reply).unwrap()).await.is_err() {
                return;
            }
        }
    }
}

fn respond(root: &Path, command: &str) -> Option<Vec<SandboxMessage>> {
    let mut parts = command.splitn(3, ' ');
    let replies = match parts.next() {
        Some("write") => {
            let path = root.join(parts.next().unwrap());
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, parts.next().unwrap_or_default()).unwrap();
            vec![
                SandboxMessage::log(format!("wrote {}\n", path.display())),
                SandboxMessage::ok(),
            ]
        }
        Some("fail") => vec![
            SandboxMessage::log("about to fail\n"),
            SandboxMessage::failed(parts.collect::<Vec<_>>().join(" ")),
        ],
        Some("hang") => Vec::new(),
        Some("drop") => return None,
        _ => vec![
            SandboxMessage::log(format!("ran {command}\n")),
            SandboxMessage::ok(),
        ],
    };
    Some(replies)
}

/// Log sink readable after the builder took ownership of a clone.
#[derive(Debug, Clone, Default)]
pub struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl SharedLog {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Base initializer that drops a marker file and counts invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingInitializer {
    calls: Arc<AtomicUsize>,
}

impl CountingInitializer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseInitializer for CountingInitializer {
    async fn init(&self, _cache_dir: &Path, path: &Path, key: &BuildKey) -> strata_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(path.join("base"), key.to_string())?;
        Ok(())
    }
}

/// Directory storage whose `tag` fails for one tag value.
#[derive(Debug)]
pub struct FailingTagDriver {
    inner: Arc<DirDriver>,
    fail_on: Tag,
}

impl FailingTagDriver {
    pub fn new(inner: Arc<DirDriver>, fail_on: &str) -> Self {
        Self {
            inner,
            fail_on: Tag::new(fail_on).unwrap(),
        }
    }
}

#[async_trait]
impl StorageDriver for FailingTagDriver {
    async fn create_empty(&self, name: &str, id: &BuildId) -> strata_store::Result<Layer> {
        self.inner.create_empty(name, id).await
    }

    async fn clone_layer(&self, src: &BuildId, name: &str, dst: &BuildId) -> strata_store::Result<Layer> {
        self.inner.clone_layer(src, name, dst).await
    }

    async fn finalize(&self, layer: Layer) -> strata_store::Result<()> {
        self.inner.finalize(layer).await
    }

    async fn info(&self, id: &BuildId) -> strata_store::Result<BuildInfo> {
        self.inner.info(id).await
    }

    async fn builds(&self) -> strata_store::Result<Vec<BuildId>> {
        self.inner.builds().await
    }

    async fn build_id(&self, key: &BuildKey) -> strata_store::Result<BuildId> {
        self.inner.build_id(key).await
    }

    async fn store_manifest(&self, info: &BuildInfo) -> strata_store::Result<()> {
        self.inner.store_manifest(info).await
    }

    async fn tag(&self, id: &BuildId, tag: &Tag) -> strata_store::Result<()> {
        if *tag == self.fail_on {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.tag(id, tag).await
    }

    async fn untag(&self, id: &BuildId, tag: &Tag) -> strata_store::Result<()> {
        self.inner.untag(id, tag).await
    }

    async fn drop_build(&self, id: &BuildId) -> strata_store::Result<()> {
        self.inner.drop_build(id).await
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub driver: Arc<DirDriver>,
    pub runner: ScriptedRunner,
    pub log: SharedLog,
    pub inits: CountingInitializer,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("specs")).unwrap();
        let driver = Arc::new(DirDriver::open(dir.path().join("store")).await.unwrap());
        Self {
            dir,
            driver,
            runner: ScriptedRunner::default(),
            log: SharedLog::default(),
            inits: CountingInitializer::default(),
        }
    }

    pub fn spec_dir(&self) -> PathBuf {
        self.dir.path().join("specs")
    }

    pub fn write_spec(&self, name: &str, content: &str) -> PathBuf {
        let path = self.spec_dir().join(format!("{name}.strata"));
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn builder(&self, rebuild: bool) -> Builder {
        self.builder_with(self.driver.clone(), rebuild)
    }

    /// Builder over a different storage view of the same root.
    pub fn builder_with(&self, driver: Arc<dyn StorageDriver>, rebuild: bool) -> Builder {
        let config = BuilderConfig::builder()
            .rebuild(rebuild)
            .spec_dir(self.spec_dir())
            .cache_dir(self.dir.path().join("cache"))
            .build()
            .unwrap();
        Builder::new(driver, Arc::new(self.runner.clone()), config)
            .with_initializer(Arc::new(self.inits.clone()))
            .with_log(Box::new(self.log.clone()))
    }
}
