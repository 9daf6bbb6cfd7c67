//! End-to-end tests for the Stowage import core.
//!
//! These tests drive the full pipeline on archives built on the fly:
//! 1. Read a `docker save` archive
//! 2. Resolve the user name to a `load/` reference
//! 3. Commit the image to a local or centralized repository
//! 4. Query availability
//! 5. Unpack the image and run a command against it through a launcher

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use stowage_common::config::StowageConfig;
use stowage_common::error::StowageError;
use stowage_common::types::{ImportState, Topology};
use stowage_image::reference::ImageReference;
use stowage_runtime::engine::Engine;

const ALPINE_OS_RELEASE: &str = "NAME=\"Alpine Linux\"\nID=alpine\nVERSION_ID=3.19.1\n\
                                 PRETTY_NAME=\"Alpine Linux v3.19\"\n\
                                 HOME_URL=\"https://alpinelinux.org/\"\n";

// ── Fixtures ─────────────────────────────────────────────────────────

enum Node<'a> {
    File(&'a str, &'a [u8]),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
}

fn layer(nodes: &[Node<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for node in nodes {
        let mut header = tar::Header::new_gnu();
        match node {
            Node::File(path, data) => {
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, *data).expect("file");
            }
            Node::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .expect("dir");
            }
            Node::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target).expect("link");
            }
        }
    }
    builder.into_inner().expect("layer")
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip");
    encoder.finish().expect("gzip finish")
}

/// Writes a `docker save` style archive holding `layers`, bottom first.
fn save_image(path: &Path, repo_tag: &str, layers: &[Vec<u8>]) {
    let mut builder = tar::Builder::new(std::fs::File::create(path).expect("archive"));
    let mut add = |name: &str, data: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).expect("member");
    };

    let mut names = Vec::new();
    for (i, layer) in layers.iter().enumerate() {
        let name = format!("{i:064x}/layer.tar");
        add(&name, layer);
        names.push(name);
    }
    let config = serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "created": "2024-01-27T00:49:08Z",
        "config": {
            "Env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "Cmd": ["/bin/sh"]
        },
        "rootfs": { "type": "layers", "diff_ids": [] }
    });
    add("config.json", &serde_json::to_vec(&config).expect("config"));
    let manifest = serde_json::json!([{
        "Config": "config.json",
        "RepoTags": [repo_tag],
        "Layers": names
    }]);
    add("manifest.json", &serde_json::to_vec(&manifest).expect("manifest"));
    builder.finish().expect("archive finish");
}

/// An alpine-like image whose `/etc/os-release` is a symlink.
fn alpine_archive(dir: &Path) -> PathBuf {
    let path = dir.join("saved_image.tar");
    let base = layer(&[
        Node::Dir("etc"),
        Node::Dir("usr"),
        Node::Dir("usr/lib"),
        Node::File("usr/lib/os-release", ALPINE_OS_RELEASE.as_bytes()),
        Node::Symlink("etc/os-release", "../usr/lib/os-release"),
    ]);
    let top = gzip(&layer(&[Node::File("etc/motd", b"Welcome to Alpine!\n")]));
    save_image(&path, "alpine:latest", &[base, top]);
    path
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Engine whose launcher exposes the root filesystem as `$ROOTFS`.
fn engine(dir: &Path) -> Engine {
    let config = StowageConfig {
        local_repository_dir: dir.join("home").join(".stowage"),
        centralized_repository_dir: Some(dir.join("centralized")),
        run_timeout_secs: 30,
        launcher: args(&["env", "ROOTFS={rootfs}"]),
        ..StowageConfig::default()
    };
    Engine::new(config)
}

fn prettyname_command() -> Vec<String> {
    args(&[
        "sh",
        "-c",
        "grep '^PRETTY_NAME=' \"$ROOTFS/etc/os-release\" | cut -d'\"' -f2",
    ])
}

// ── Load Scenario ────────────────────────────────────────────────────

fn load_and_check_prettyname(topology: Topology) {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let engine = engine(dir.path());

    let report = engine
        .import(topology, &archive, "alpine")
        .expect("import should succeed");
    assert_eq!(report.state(), ImportState::Loaded);
    assert_eq!(report.reference.to_string(), "load/library/alpine:latest");

    let reference = engine
        .resolve(topology, "load/library/alpine:latest")
        .expect("canonical name resolves");
    assert!(engine.is_available(topology, &reference).expect("query"));

    let prettyname = engine
        .run_and_capture(topology, &reference, &prettyname_command())
        .expect("run should succeed");
    assert!(
        prettyname.starts_with("Alpine Linux"),
        "unexpected pretty name {prettyname:?}"
    );
    assert_eq!(
        report.entry.manifest.pretty_name.as_deref(),
        Some("Alpine Linux v3.19")
    );
}

#[test]
fn load_with_local_repository() {
    load_and_check_prettyname(Topology::Local);
}

#[test]
fn load_with_centralized_repository() {
    load_and_check_prettyname(Topology::Centralized);
}

// ── Repository Semantics ─────────────────────────────────────────────

#[test]
fn reimport_yields_equal_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let engine = engine(dir.path());

    let first = engine
        .import(Topology::Local, &archive, "alpine")
        .expect("first import");
    let second = engine
        .import(Topology::Local, &archive, "alpine")
        .expect("second import");
    assert!(first.entry.same_content(&second.entry));
    assert_eq!(engine.list(Topology::Local).expect("list").len(), 1);
}

#[test]
fn topologies_are_isolated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let engine = engine(dir.path());

    let report = engine
        .import(Topology::Local, &archive, "alpine")
        .expect("import");
    assert!(
        !engine
            .is_available(Topology::Centralized, &report.reference)
            .expect("query")
    );

    let _ = engine
        .import(Topology::Centralized, &archive, "alpine")
        .expect("import centralized");
    assert!(engine.remove(Topology::Local, "alpine").expect("remove"));
    assert!(
        engine
            .is_available(Topology::Centralized, &report.reference)
            .expect("query")
    );
}

#[test]
fn loaded_names_never_collide_with_pulled_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());
    for name in ["alpine", "alpine:3.19", "ethcscs/mpich:ub1804", "quay.io/org/app"] {
        let loaded = engine.resolve(Topology::Local, name).expect("loaded");
        let pulled = ImageReference::parse(name).expect("pulled");
        assert_ne!(loaded.to_string(), pulled.to_string());
    }
}

#[test]
fn centralized_without_configuration_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let config = StowageConfig {
        local_repository_dir: dir.path().join("local"),
        centralized_repository_dir: None,
        ..StowageConfig::default()
    };
    let engine = Engine::new(config);

    let err = engine
        .import(Topology::Centralized, &archive, "alpine")
        .expect_err("should fail");
    assert!(matches!(err, StowageError::Config { .. }));
}

#[test]
fn corrupt_archive_is_reported_and_nothing_is_stored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = dir.path().join("corrupt.tar");
    std::fs::write(&archive, b"definitely not a tar archive").expect("write");
    let engine = engine(dir.path());

    let err = engine
        .import(Topology::Local, &archive, "alpine")
        .expect_err("should fail");
    assert!(matches!(err, StowageError::CorruptArchive { .. }));
    assert!(!err.is_retryable());
    assert!(engine.list(Topology::Local).expect("list").is_empty());
}

// ── Run Failures ─────────────────────────────────────────────────────

#[test]
fn run_of_never_imported_reference_spawns_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("launcher-ran");
    let config = StowageConfig {
        local_repository_dir: dir.path().join("local"),
        launcher: args(&["touch", &marker.to_string_lossy()]),
        ..StowageConfig::default()
    };
    let engine = Engine::new(config);
    let reference = engine.resolve(Topology::Local, "ghost").expect("resolve");

    let err = engine
        .run_and_capture(Topology::Local, &reference, &args(&["true"]))
        .expect_err("should fail");
    assert!(matches!(err, StowageError::Launch { .. }));
    assert!(!marker.exists(), "launcher must not be spawned");
}

#[test]
fn non_zero_exit_is_launch_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let engine = engine(dir.path());
    let report = engine
        .import(Topology::Local, &archive, "alpine")
        .expect("import");

    let err = engine
        .run_and_capture(Topology::Local, &report.reference, &args(&["sh", "-c", "exit 42"]))
        .expect_err("should fail");
    assert!(matches!(err, StowageError::Launch { .. }));
}

#[test]
fn run_timeout_kills_the_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = alpine_archive(dir.path());
    let config = StowageConfig {
        local_repository_dir: dir.path().join("local"),
        scratch_dir: Some(dir.path().join("scratch")),
        run_timeout_secs: 1,
        launcher: args(&["env", "ROOTFS={rootfs}"]),
        ..StowageConfig::default()
    };
    let engine = Engine::new(config);
    let report = engine
        .import(Topology::Local, &archive, "alpine")
        .expect("import");

    let started = std::time::Instant::now();
    let err = engine
        .run_and_capture(Topology::Local, &report.reference, &args(&["sleep", "60"]))
        .expect_err("should time out");
    assert!(err.to_string().contains("timed out"));
    assert!(started.elapsed() < std::time::Duration::from_secs(30));

    let leftovers = std::fs::read_dir(dir.path().join("scratch"))
        .expect("scratch")
        .count();
    assert_eq!(leftovers, 0, "scratch root filesystem should be removed");
}

// ── File Names ───────────────────────────────────────────────────────

#[test]
fn non_ascii_file_names_survive_import_and_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = dir.path().join("non_ascii.tar");
    let base = layer(&[
        Node::Dir("földèr"),
        Node::File("földèr/filé", b"1"),
        Node::File("földèr/ファイル", b"2"),
    ]);
    save_image(&archive, "dockerfiles:image-with-non-ascii-characters", &[gzip(&base)]);
    let engine = engine(dir.path());

    let report = engine
        .import(
            Topology::Local,
            &archive,
            "ethcscs/dockerfiles:image-with-non-ascii-characters",
        )
        .expect("import");
    let output = engine
        .run_and_capture(
            Topology::Local,
            &report.reference,
            &args(&["sh", "-c", "ls \"$ROOTFS/földèr\""]),
        )
        .expect("run");
    assert!(output.contains("filé"), "{output}");
    assert!(output.contains("ファイル"), "{output}");
}
