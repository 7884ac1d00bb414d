//! Integration tests for the build orchestrator.
//!
//! Storage is a real directory tree under a tempdir; RUN steps go to the
//! in-process scripted sandbox from `common`.

mod common;

use common::{FailingTagDriver, Harness};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{BuildError, Command, Descriptor, Repository};
use strata_sandbox::SandboxError;
use strata_store::{BootEntry, BuildId, BuildInfo, BuildKey, BuildType, StorageDriver, Tag};

fn key(s: &str) -> BuildKey {
    s.parse().unwrap()
}

fn from(s: &str) -> Command {
    Command::From(key(s))
}

fn run(s: &str) -> Command {
    Command::Run(s.to_string())
}

fn params(values: &[&str]) -> Command {
    Command::Params(values.iter().map(|v| v.to_string()).collect())
}

#[tokio::test]
async fn test_base_build_is_reused() {
    let h = Harness::new().await;
    let base = Descriptor::new("alpine");

    let first = h.builder(false).build(&base).await.unwrap();
    let second = h.builder(false).build(&base).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.driver.builds().await.unwrap(), vec![first]);
    assert_eq!(h.inits.calls(), 1);
}

#[tokio::test]
async fn test_build_chain_from_synthesized_base() {
    let h = Harness::new().await;
    let web = Descriptor::new("web")
        .with_command(from("alpine"))
        .with_command(run("write etc/motd hello"))
        .with_command(params(&["console=ttyS0"]))
        .with_command(Command::Boot(BootEntry {
            title: "default".into(),
            params: vec!["quiet".into()],
        }));

    let id = h.builder(false).build(&web).await.unwrap();
    let alpine = h.driver.build_id(&key("alpine")).await.unwrap();

    let info = h.driver.info(&id).await.unwrap();
    assert_eq!(info.name, "web");
    assert_eq!(info.based_on, Some(alpine));
    assert_eq!(info.params, vec!["console=ttyS0"]);
    assert_eq!(info.boots.len(), 1);
    assert!(info.tags.contains(&Tag::latest()));

    let root = h.driver.rootfs_path(&id);
    assert_eq!(std::fs::read_to_string(root.join("etc/motd")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(root.join("base")).unwrap(), "alpine:latest");
    assert!(h.log.contents().contains("etc/motd"));
    assert_eq!(h.runner.commands(), vec!["write etc/motd hello"]);
}

#[tokio::test]
async fn test_params_inherited_along_chain() {
    let h = Harness::new().await;
    let mut builder = h.builder(false);
    builder
        .build(&Descriptor::new("os").with_command(from("alpine")).with_command(params(&["a=1"])))
        .await
        .unwrap();

    let web = Descriptor::new("web").with_command(from("os")).with_command(params(&["b=2"]));
    let id = builder.build(&web).await.unwrap();

    assert_eq!(h.driver.info(&id).await.unwrap().params, vec!["a=1", "b=2"]);
}

#[tokio::test]
async fn test_dependency_cycle_leaves_storage_untouched() {
    let h = Harness::new().await;
    let a = h.write_spec("a", "FROM b\nRUN step-a\n");
    h.write_spec("b", "FROM a\nRUN step-b\n");

    let err = h.builder(false).build_file(&a).await.unwrap_err();

    assert!(matches!(err, BuildError::DependencyCycle(ref k) if *k == key("a")));
    assert!(h.driver.builds().await.unwrap().is_empty());
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn test_failed_run_discards_layer() {
    let h = Harness::new().await;
    let web = Descriptor::new("web")
        .with_command(from("alpine"))
        .with_command(run("step-one"))
        .with_command(run("fail exit status 2"))
        .with_command(run("step-three"));

    let err = h.builder(false).build(&web).await.unwrap_err();

    assert!(matches!(
        err,
        BuildError::Sandbox(SandboxError::CommandFailed(ref msg)) if msg == "exit status 2"
    ));
    let alpine = h.driver.build_id(&key("alpine")).await.unwrap();
    assert_eq!(h.driver.builds().await.unwrap(), vec![alpine]);
    assert!(h.driver.build_id(&key("web")).await.unwrap_err().is_not_found());
    assert_eq!(h.runner.commands(), vec!["step-one", "fail exit status 2"]);
    assert!(h.log.contents().contains("about to fail"));
}

#[tokio::test]
async fn test_protocol_violation_discards_layer() {
    let h = Harness::new().await;
    let web = Descriptor::new("web")
        .with_command(from("alpine"))
        .with_command(run("drop"));

    let err = h.builder(false).build(&web).await.unwrap_err();

    assert!(matches!(err, BuildError::Sandbox(SandboxError::ProtocolViolation(_))));
    assert_eq!(h.driver.builds().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sibling_spec_file() {
    let h = Harness::new().await;
    h.write_spec("alpine", "# local alpine\nFROM scratch\nPARAMS from-file\n");

    let web = Descriptor::new("web").with_command(from("alpine"));
    let id = h.builder(false).build(&web).await.unwrap();

    let alpine = h.driver.info(&h.driver.build_id(&key("alpine")).await.unwrap()).await.unwrap();
    let scratch = h.driver.build_id(&key("scratch")).await.unwrap();
    assert_eq!(alpine.based_on, Some(scratch));
    assert_eq!(h.driver.info(&id).await.unwrap().params, vec!["from-file"]);
}

#[tokio::test]
async fn test_repository_fallback_for_non_default_tag() {
    let h = Harness::new().await;
    // Sibling files only answer for the default tag.
    h.write_spec("tools", "FROM alpine\nPARAMS from-file\n");

    let mut repo = Repository::new();
    repo.register(
        Descriptor::new("tools")
            .with_tags([Tag::new("v1").unwrap()])
            .with_command(from("alpine"))
            .with_command(params(&["from-repo"])),
    )
    .unwrap();

    let web = Descriptor::new("web").with_command(from("tools:v1"));
    let id = h.builder(false).with_repository(repo).build(&web).await.unwrap();

    assert_eq!(h.driver.info(&id).await.unwrap().params, vec!["from-repo"]);
    assert!(h.driver.build_id(&key("tools")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_ready_cache_under_rebuild() {
    let h = Harness::new().await;
    let web1 = Descriptor::new("web1").with_command(from("alpine"));
    let web2 = Descriptor::new("web2").with_command(from("alpine"));

    let mut builder = h.builder(true);
    let id1 = builder.build(&web1).await.unwrap();
    let id2 = builder.build(&web2).await.unwrap();
    assert!(builder.is_ready(&key("alpine")));
    assert_eq!(h.inits.calls(), 1);

    let base1 = h.driver.info(&id1).await.unwrap().based_on;
    let base2 = h.driver.info(&id2).await.unwrap().based_on;
    assert_eq!(base1, base2);

    // A new invocation starts with an empty ready cache.
    let id3 = h.builder(true).build(&web1).await.unwrap();
    assert_eq!(h.inits.calls(), 2);
    let base3 = h.driver.info(&id3).await.unwrap().based_on;
    assert_ne!(base3, base1);
    assert_eq!(Some(h.driver.build_id(&key("alpine")).await.unwrap()), base3);
}

#[tokio::test]
async fn test_not_cloneable_base() {
    let h = Harness::new().await;
    let disk = BuildId::new(BuildType::Mount);
    let layer = h.driver.create_empty("disk", &disk).await.unwrap();
    h.driver.finalize(layer).await.unwrap();
    h.driver
        .store_manifest(&BuildInfo::new(disk.clone(), "disk", None))
        .await
        .unwrap();
    h.driver.tag(&disk, &Tag::latest()).await.unwrap();

    let web = Descriptor::new("web").with_command(from("disk"));
    let err = h.builder(false).build(&web).await.unwrap_err();

    assert!(matches!(err, BuildError::NotCloneable(ref id) if *id == disk));
    assert_eq!(h.driver.builds().await.unwrap(), vec![disk]);
}

#[tokio::test]
async fn test_first_command_must_be_from() {
    let h = Harness::new().await;
    let web = Descriptor::new("web").with_command(run("make"));

    let err = h.builder(false).build(&web).await.unwrap_err();

    assert!(matches!(err, BuildError::MissingFromCommand(ref name) if name == "web"));
    assert!(h.driver.builds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_misplaced_from_discards_layer() {
    let h = Harness::new().await;
    let web = Descriptor::new("web")
        .with_command(from("alpine"))
        .with_command(run("make"))
        .with_command(from("debian"));

    let err = h.builder(false).build(&web).await.unwrap_err();

    assert!(matches!(err, BuildError::MisplacedFrom(_)));
    assert_eq!(h.driver.builds().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_base_requires_exactly_one_tag() {
    let h = Harness::new().await;
    let base = Descriptor::new("alpine").with_tags([Tag::latest(), Tag::new("3.19").unwrap()]);

    let err = h.builder(false).build(&base).await.unwrap_err();

    assert!(matches!(err, BuildError::BaseTagCount { count: 2, .. }));
    assert!(h.driver.builds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_name_rejected() {
    let h = Harness::new().await;
    let err = h.builder(false).build(&Descriptor::new("Web App")).await.unwrap_err();
    assert!(matches!(err, BuildError::Store(strata_store::StoreError::InvalidName(_))));
}

#[tokio::test]
async fn test_cancelled_before_commands() {
    let h = Harness::new().await;
    let mut builder = h.builder(false);
    builder.build(&Descriptor::new("alpine")).await.unwrap();

    builder.cancel_token().cancel();
    let web = Descriptor::new("web").with_command(from("alpine")).with_command(run("make"));
    let err = builder.build(&web).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.driver.builds().await.unwrap().len(), 1);
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn test_cancelled_while_sandbox_runs() {
    let h = Harness::new().await;
    let mut builder = h.builder(false);
    let cancel = builder.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let web = Descriptor::new("web").with_command(from("alpine")).with_command(run("hang"));
    let err = builder.build(&web).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.driver.builds().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_build_files_stops_at_first_failure() {
    let h = Harness::new().await;
    let ok = h.write_spec("ok", "FROM alpine\nRUN make\n");
    let bad = h.write_spec("bad", "FROM alpine\nRUN fail broken\n");
    let never = h.write_spec("never", "FROM alpine\nRUN make\n");

    let err = h.builder(false).build_files(&[ok, bad, never]).await.unwrap_err();

    assert!(matches!(err, BuildError::Sandbox(SandboxError::CommandFailed(_))));
    assert!(h.driver.build_id(&key("ok")).await.is_ok());
    assert!(h.driver.build_id(&key("bad")).await.unwrap_err().is_not_found());
    assert!(h.driver.build_id(&key("never")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rebuild_moves_tags() {
    let h = Harness::new().await;
    let web = Descriptor::new("web")
        .with_tags([Tag::latest(), Tag::new("v2").unwrap()])
        .with_command(from("alpine"));

    let mut builder = h.builder(false);
    let first = builder.build(&web).await.unwrap();
    let second = builder.build(&web).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.driver.build_id(&key("web")).await.unwrap(), second);
    assert_eq!(h.driver.build_id(&key("web:v2")).await.unwrap(), second);
    assert!(h.driver.info(&first).await.unwrap().tags.is_empty());
}

#[tokio::test]
async fn test_failed_tagging_restores_previous_owner() {
    let h = Harness::new().await;
    let first = h
        .builder(false)
        .build(&Descriptor::new("web").with_command(from("alpine")))
        .await
        .unwrap();

    let web = Descriptor::new("web")
        .with_tags([Tag::latest(), Tag::new("v2").unwrap()])
        .with_command(from("alpine"));
    let failing = Arc::new(FailingTagDriver::new(h.driver.clone(), "v2"));
    let err = h.builder_with(failing, false).build(&web).await.unwrap_err();

    assert!(matches!(err, BuildError::Store(_)), "unexpected error: {err:?}");
    assert_eq!(h.driver.build_id(&key("web")).await.unwrap(), first);
    assert!(h.driver.build_id(&key("web:v2")).await.unwrap_err().is_not_found());
    assert_eq!(
        h.driver.info(&first).await.unwrap().tags.into_iter().collect::<Vec<_>>(),
        vec![Tag::latest()]
    );
    let base = h.driver.build_id(&key("alpine")).await.unwrap();
    let mut expected = vec![base, first];
    expected.sort();
    assert_eq!(h.driver.builds().await.unwrap(), expected);
}

#[tokio::test]
async fn test_parse_error_reports_file() {
    let h = Harness::new().await;
    let path = h.write_spec("web", "FROM alpine\nCOPY a b\n");

    let err = h.builder(false).build_file(&path).await.unwrap_err();

    match err {
        BuildError::Parse { path: reported, source } => {
            assert_eq!(reported, path);
            assert_eq!(source.line, 2);
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}
