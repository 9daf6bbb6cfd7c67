//! Reader for `docker save` style image archives.
//!
//! An archive is a tar holding `manifest.json`, the image config and one
//! tarball per layer:
//!
//! ```text
//! manifest.json                 [{"Config": ..., "RepoTags": [...], "Layers": [...]}]
//! <config>.json                 {"created": ..., "config": {...}, "rootfs": {...}}
//! <id>/layer.tar                layer tarball, possibly gzip-compressed
//! ```
//!
//! Reading never writes anything. Layer bytes are not kept in memory: each
//! [`LayerBlob`] remembers where it lives and streams itself out on demand.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use stowage_common::constants::MAX_IMAGE_LAYERS;
use stowage_common::error::{Result, StowageError};
use stowage_common::types::{ImageId, Sha256Hash};

use crate::hash::HashingWriter;
use crate::layer::Compression;
use crate::os_release::OsReleaseSearch;

/// Name of the index file at the archive root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Members up to this size are kept in memory while scanning.
const SMALL_MEMBER_LIMIT: usize = 1024 * 1024;

/// Bytes kept from larger members, enough to sniff compression.
const HEAD_LEN: usize = 8;

/// Symlink hops followed when resolving a layer path.
const MAX_LINK_DEPTH: usize = 8;

/// One record of `manifest.json`.
#[derive(Debug, Deserialize)]
struct ManifestRecord {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

/// The subset of the image config the core uses.
#[derive(Debug, Default, Deserialize)]
struct ImageConfigFile {
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    config: Option<RuntimeConfig>,
    #[serde(default)]
    rootfs: Option<RootFs>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeConfig {
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default)]
    working_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

/// Image metadata gathered from an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Tags recorded by the exporter, e.g. `alpine:latest`.
    pub repo_tags: Vec<String>,
    /// Digest of the image config.
    pub config_digest: Sha256Hash,
    /// Image creation time as written by the builder.
    pub created: Option<String>,
    /// Target CPU architecture.
    pub architecture: Option<String>,
    /// Target operating system.
    pub os: Option<String>,
    /// Default environment.
    pub env: Vec<String>,
    /// Default command.
    pub cmd: Vec<String>,
    /// Entrypoint prepended to the command.
    pub entrypoint: Vec<String>,
    /// Working directory for the command.
    pub working_dir: Option<String>,
    /// Layer digests, bottom first.
    pub layers: Vec<Sha256Hash>,
    /// `PRETTY_NAME` from the image's `os-release`.
    pub pretty_name: Option<String>,
}

impl ImageManifest {
    /// Returns the identifier derived from the config digest.
    #[must_use]
    pub fn image_id(&self) -> ImageId {
        ImageId::from_config_digest(&self.config_digest)
    }

    /// Returns the name the exporter recorded for the image, if any.
    #[must_use]
    pub fn base_image_name(&self) -> Option<&str> {
        self.repo_tags.first().map(String::as_str)
    }

    /// Human-readable identity: pretty name, else base name, else image id.
    #[must_use]
    pub fn description(&self) -> String {
        self.pretty_name
            .clone()
            .or_else(|| self.base_image_name().map(str::to_string))
            .unwrap_or_else(|| self.image_id().short().to_string())
    }
}

/// A layer tarball inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBlob {
    archive: PathBuf,
    /// Member path inside the archive.
    pub member: String,
    /// Digest of the member bytes.
    pub digest: Sha256Hash,
    /// Size of the member in bytes.
    pub size_bytes: u64,
    /// Compression detected from the member's first bytes.
    pub compression: Compression,
}

impl LayerBlob {
    /// Streams the layer bytes into `writer`, returning the count.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the archive cannot be reopened or the writer fails,
    /// and `CorruptArchive` if the member disappeared.
    pub fn copy_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<u64> {
        with_member(&self.archive, &self.member, |reader| {
            io::copy(reader, writer).map_err(|e| StowageError::io(&self.archive, e))
        })
    }

    /// Path of the archive this layer belongs to.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }
}

/// Everything an import needs from an archive.
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    /// Parsed image metadata.
    pub manifest: ImageManifest,
    /// Raw image config, stored alongside the layers.
    pub config: Vec<u8>,
    /// Layers, bottom first.
    pub layers: Vec<LayerBlob>,
}

impl ArchiveContents {
    /// Sum of the layer sizes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }
}

/// Handle to an archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArchive {
    path: PathBuf,
}

/// A member seen while scanning the outer tar.
#[derive(Debug)]
struct Member {
    digest: Sha256Hash,
    size: u64,
    /// Whole content for small members, the first bytes otherwise.
    head: Vec<u8>,
}

impl Member {
    fn content(&self) -> Option<&[u8]> {
        (self.head.len() as u64 == self.size).then_some(self.head.as_slice())
    }
}

/// Writer keeping the first `limit` bytes it receives.
struct PrefixCapture {
    buf: Vec<u8>,
    limit: usize,
}

impl Write for PrefixCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..room.min(data.len())]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ImageArchive {
    /// Opens a handle after checking the path is a readable file.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Io` if the path cannot be accessed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(|e| StowageError::io(&path, e))?;
        if !meta.is_file() {
            return Err(StowageError::io(
                &path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        Ok(Self { path })
    }

    /// Returns the archive path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the archive.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `CorruptArchive` if the
    /// tar stream, the manifest, the config or a layer is missing or
    /// malformed.
    pub fn read(&self) -> Result<ArchiveContents> {
        tracing::info!(archive = %self.path.display(), "reading image archive");
        let (members, links) = self.scan()?;

        let manifest_bytes = members
            .get(MANIFEST_FILE)
            .and_then(Member::content)
            .ok_or_else(|| self.corrupt("manifest.json is missing"))?;
        let records: Vec<ManifestRecord> = serde_json::from_slice(manifest_bytes)
            .map_err(|e| self.corrupt(format!("manifest.json is not valid: {e}")))?;
        let record = match records.as_slice() {
            [] => return Err(self.corrupt("manifest.json lists no image")),
            [first, rest @ ..] => {
                if !rest.is_empty() {
                    tracing::warn!(
                        images = records.len(),
                        "archive holds several images, importing the first"
                    );
                }
                first
            }
        };

        let config_member = members
            .get(&normalize(&record.config))
            .ok_or_else(|| self.corrupt(format!("config {} is missing", record.config)))?;
        let config = config_member
            .content()
            .ok_or_else(|| self.corrupt("image config is too large"))?
            .to_vec();
        let config_file: ImageConfigFile = serde_json::from_slice(&config)
            .map_err(|e| self.corrupt(format!("image config is not valid: {e}")))?;

        let layers = self.collect_layers(record, &members, &links, &config_file)?;
        let pretty_name = self.find_pretty_name(&layers)?;

        let runtime = config_file.config.unwrap_or_default();
        let manifest = ImageManifest {
            repo_tags: record.repo_tags.clone().unwrap_or_default(),
            config_digest: config_member.digest.clone(),
            created: config_file.created,
            architecture: config_file.architecture,
            os: config_file.os,
            env: runtime.env.unwrap_or_default(),
            cmd: runtime.cmd.unwrap_or_default(),
            entrypoint: runtime.entrypoint.unwrap_or_default(),
            working_dir: runtime.working_dir.filter(|w| !w.is_empty()),
            layers: layers.iter().map(|l| l.digest.clone()).collect(),
            pretty_name,
        };

        tracing::info!(
            archive = %self.path.display(),
            image = %manifest.image_id().short(),
            layers = layers.len(),
            description = %manifest.description(),
            "image archive parsed"
        );
        Ok(ArchiveContents {
            manifest,
            config,
            layers,
        })
    }

    /// Hashes every regular member and records symlinks.
    fn scan(&self) -> Result<(HashMap<String, Member>, HashMap<String, String>)> {
        let file = std::fs::File::open(&self.path).map_err(|e| StowageError::io(&self.path, e))?;
        let mut archive = tar::Archive::new(file);
        let mut members = HashMap::new();
        let mut links = HashMap::new();

        let entries = archive
            .entries_with_seek()
            .map_err(|e| self.corrupt(format!("not a tar archive: {e}")))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| self.corrupt(format!("bad tar entry: {e}")))?;
            let name = entry
                .path()
                .map_err(|e| self.corrupt(format!("bad member path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let name = normalize(&name);
            let kind = entry.header().entry_type();

            if kind.is_symlink() {
                if let Ok(Some(target)) = entry.link_name() {
                    let target = resolve_link(&name, &target);
                    let _ = links.insert(name, target);
                }
                continue;
            }
            if !kind.is_file() {
                continue;
            }

            let mut writer = HashingWriter::new(PrefixCapture {
                buf: Vec::new(),
                limit: SMALL_MEMBER_LIMIT,
            });
            let _ = io::copy(&mut entry, &mut writer)
                .map_err(|e| self.corrupt(format!("truncated member {name}: {e}")))?;
            let (capture, digest, size) = writer.finish();
            let mut head = capture.buf;
            if head.len() as u64 != size {
                head.truncate(HEAD_LEN);
            }
            let _ = members.insert(name, Member { digest, size, head });
        }
        Ok((members, links))
    }

    fn collect_layers(
        &self,
        record: &ManifestRecord,
        members: &HashMap<String, Member>,
        links: &HashMap<String, String>,
        config: &ImageConfigFile,
    ) -> Result<Vec<LayerBlob>> {
        if record.layers.is_empty() {
            return Err(self.corrupt("image has no layers"));
        }
        if record.layers.len() > MAX_IMAGE_LAYERS {
            return Err(self.corrupt(format!(
                "image has {} layers, at most {MAX_IMAGE_LAYERS} are supported",
                record.layers.len()
            )));
        }

        let diff_ids = config
            .rootfs
            .as_ref()
            .map(|r| r.diff_ids.as_slice())
            .unwrap_or_default();
        if !diff_ids.is_empty() && diff_ids.len() != record.layers.len() {
            return Err(self.corrupt(format!(
                "config lists {} diff_ids for {} layers",
                diff_ids.len(),
                record.layers.len()
            )));
        }

        let mut layers = Vec::with_capacity(record.layers.len());
        for (index, layer_path) in record.layers.iter().enumerate() {
            let mut name = normalize(layer_path);
            for _ in 0..MAX_LINK_DEPTH {
                match links.get(&name) {
                    Some(target) => name.clone_from(target),
                    None => break,
                }
            }
            let member = members
                .get(&name)
                .ok_or_else(|| self.corrupt(format!("layer {layer_path} is missing")))?;
            let compression = Compression::detect(&member.head);

            if compression == Compression::None {
                if let Some(expected) = diff_ids.get(index) {
                    if expected.strip_prefix("sha256:").unwrap_or(expected) != member.digest.as_hex()
                    {
                        return Err(self.corrupt(format!(
                            "layer {layer_path} does not match diff_id {expected}"
                        )));
                    }
                }
            }

            layers.push(LayerBlob {
                archive: self.path.clone(),
                member: name,
                digest: member.digest.clone(),
                size_bytes: member.size,
                compression,
            });
        }
        Ok(layers)
    }

    /// Scans layers top-down for `os-release`.
    fn find_pretty_name(&self, layers: &[LayerBlob]) -> Result<Option<String>> {
        let mut search = OsReleaseSearch::new();
        for layer in layers.iter().rev() {
            if layer.compression == Compression::Zstd {
                tracing::debug!(member = %layer.member, "skipping zstd layer in os-release search");
                continue;
            }
            with_member(&self.path, &layer.member, |reader| {
                let decoded = layer
                    .compression
                    .decoder(reader)
                    .map_err(|e| self.corrupt(format!("layer {}: {e}", layer.member)))?;
                search
                    .scan_layer(decoded)
                    .map_err(|e| self.corrupt(format!("layer {} is not a tar: {e}", layer.member)))
            })?;
            if search.is_settled() {
                break;
            }
        }
        Ok(search.finish())
    }

    fn corrupt(&self, reason: impl Into<String>) -> StowageError {
        StowageError::corrupt(&self.path, reason)
    }
}

/// Reads the archive at `archive_path`.
///
/// # Errors
///
/// See [`ImageArchive::read`].
pub fn read(archive_path: &Path) -> Result<ArchiveContents> {
    ImageArchive::open(archive_path)?.read()
}

/// Reopens `archive`, seeks to `member` and hands its reader to `f`.
fn with_member<T, F>(archive: &Path, member: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let file = std::fs::File::open(archive).map_err(|e| StowageError::io(archive, e))?;
    let mut tar = tar::Archive::new(file);
    let entries = tar
        .entries_with_seek()
        .map_err(|e| StowageError::corrupt(archive, format!("not a tar archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| StowageError::corrupt(archive, format!("bad tar entry: {e}")))?;
        let matches = entry
            .path()
            .is_ok_and(|p| normalize(&p.to_string_lossy()) == member);
        if matches && entry.header().entry_type().is_file() {
            return f(&mut entry);
        }
    }
    Err(StowageError::corrupt(
        archive,
        format!("member {member} is missing"),
    ))
}

/// Canonical member name: no `./` prefix, no leading slash.
fn normalize(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
            Component::ParentDir => {
                let _ = parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}

/// Resolves a symlink target relative to the link's own directory.
fn resolve_link(link: &str, target: &Path) -> String {
    let target = target.to_string_lossy();
    if target.starts_with('/') {
        return normalize(&target);
    }
    let parent = Path::new(link).parent().unwrap_or_else(|| Path::new(""));
    normalize(&parent.join(target.as_ref()).to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(builder: &mut tar::Builder<std::fs::File>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).expect("append");
    }

    fn layer_tar(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data.as_bytes())
                .expect("append");
        }
        builder.into_inner().expect("finish")
    }

    fn config_for(layers: &[&[u8]]) -> Vec<u8> {
        let diff_ids: Vec<String> = layers
            .iter()
            .map(|l| crate::hash::hash_bytes(l).to_string())
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "created": "2024-01-27T00:00:00Z",
            "config": { "Env": ["PATH=/bin"], "Cmd": ["/bin/sh"], "WorkingDir": "" },
            "rootfs": { "type": "layers", "diff_ids": diff_ids }
        }))
        .expect("config json")
    }

    fn write_archive(dir: &Path, layers: &[Vec<u8>]) -> PathBuf {
        let path = dir.join("saved_image.tar");
        let file = std::fs::File::create(&path).expect("create");
        let mut builder = tar::Builder::new(file);
        let refs: Vec<&[u8]> = layers.iter().map(Vec::as_slice).collect();
        let config = config_for(&refs);
        let mut layer_paths = Vec::new();
        for (i, layer) in layers.iter().enumerate() {
            let member = format!("layer{i}/layer.tar");
            append(&mut builder, &member, layer);
            layer_paths.push(member);
        }
        append(&mut builder, "cfg.json", &config);
        let manifest = serde_json::json!([{
            "Config": "cfg.json",
            "RepoTags": ["alpine:latest"],
            "Layers": layer_paths,
        }]);
        append(&mut builder, MANIFEST_FILE, &serde_json::to_vec(&manifest).expect("json"));
        builder.finish().expect("finish");
        path
    }

    fn alpine_layer() -> Vec<u8> {
        layer_tar(&[
            ("bin/sh", "#!"),
            ("etc/os-release", "NAME=\"Alpine Linux\"\nPRETTY_NAME=\"Alpine Linux v3.19\"\n"),
        ])
    }

    #[test]
    fn read_extracts_manifest_and_layers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = alpine_layer();
        let top = layer_tar(&[("root/.profile", "export PS1")]);
        let path = write_archive(dir.path(), &[base.clone(), top.clone()]);

        let contents = read(&path).expect("read");
        assert_eq!(contents.layers.len(), 2);
        assert_eq!(contents.layers[0].digest, crate::hash::hash_bytes(&base));
        assert_eq!(contents.layers[1].digest, crate::hash::hash_bytes(&top));
        assert_eq!(contents.manifest.base_image_name(), Some("alpine:latest"));
        assert_eq!(contents.manifest.cmd, vec!["/bin/sh"]);
        assert_eq!(contents.manifest.working_dir, None);
        assert_eq!(contents.manifest.created.as_deref(), Some("2024-01-27T00:00:00Z"));
        assert_eq!(contents.manifest.pretty_name.as_deref(), Some("Alpine Linux v3.19"));
        assert!(contents.manifest.description().starts_with("Alpine Linux"));
        assert_eq!(contents.size_bytes(), (base.len() + top.len()) as u64);
    }

    #[test]
    fn layer_blob_streams_original_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = alpine_layer();
        let path = write_archive(dir.path(), std::slice::from_ref(&base));

        let contents = read(&path).expect("read");
        let mut out = Vec::new();
        let copied = contents.layers[0].copy_to(&mut out).expect("copy");
        assert_eq!(copied, base.len() as u64);
        assert_eq!(out, base);
    }

    #[test]
    fn reading_twice_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_archive(dir.path(), &[alpine_layer()]);
        let first = read(&path).expect("first");
        let second = read(&path).expect("second");
        assert_eq!(first.manifest, second.manifest);
        assert_eq!(first.layers, second.layers);
    }

    #[test]
    fn missing_manifest_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("no_manifest.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).expect("create"));
        append(&mut builder, "layer0/layer.tar", &alpine_layer());
        builder.finish().expect("finish");

        assert!(matches!(read(&path), Err(StowageError::CorruptArchive { .. })));
    }

    #[test]
    fn unparsable_manifest_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad_manifest.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).expect("create"));
        append(&mut builder, MANIFEST_FILE, b"{ this is not json");
        builder.finish().expect("finish");

        assert!(matches!(read(&path), Err(StowageError::CorruptArchive { .. })));
    }

    #[test]
    fn manifest_pointing_at_missing_layer_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dangling.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).expect("create"));
        append(&mut builder, "cfg.json", b"{}");
        let manifest = br#"[{"Config":"cfg.json","RepoTags":null,"Layers":["gone/layer.tar"]}]"#;
        append(&mut builder, MANIFEST_FILE, manifest);
        builder.finish().expect("finish");

        let err = read(&path).expect_err("should fail");
        assert!(err.to_string().contains("gone/layer.tar"));
    }

    #[test]
    fn diff_id_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tampered.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).expect("create"));
        let layer = alpine_layer();
        append(&mut builder, "layer0/layer.tar", &layer);
        append(&mut builder, "cfg.json", &config_for(&[b"something else".as_slice()]));
        let manifest = br#"[{"Config":"cfg.json","RepoTags":[],"Layers":["layer0/layer.tar"]}]"#;
        append(&mut builder, MANIFEST_FILE, manifest);
        builder.finish().expect("finish");

        assert!(matches!(read(&path), Err(StowageError::CorruptArchive { .. })));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.tar");
        std::fs::write(&path, vec![0x42; 2048]).expect("write");
        assert!(matches!(read(&path), Err(StowageError::CorruptArchive { .. })));
    }

    #[test]
    fn unreadable_path_is_io_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            read(&dir.path().join("missing.tar")),
            Err(StowageError::Io { .. })
        ));
        assert!(matches!(read(dir.path()), Err(StowageError::Io { .. })));
    }

    #[test]
    fn symlinked_layer_resolves_to_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("linked.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).expect("create"));
        let layer = alpine_layer();
        append(&mut builder, "aaa/layer.tar", &layer);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "bbb/layer.tar", "../aaa/layer.tar")
            .expect("link");
        append(&mut builder, "cfg.json", &config_for(&[layer.as_slice(), layer.as_slice()]));
        let manifest =
            br#"[{"Config":"cfg.json","RepoTags":["dup:1"],"Layers":["aaa/layer.tar","bbb/layer.tar"]}]"#;
        append(&mut builder, MANIFEST_FILE, manifest);
        builder.finish().expect("finish");

        let contents = read(&path).expect("read");
        assert_eq!(contents.layers[1].member, "aaa/layer.tar");
        assert_eq!(contents.layers[0].digest, contents.layers[1].digest);
    }

    #[test]
    fn normalize_strips_dot_and_slash() {
        assert_eq!(normalize("./manifest.json"), "manifest.json");
        assert_eq!(normalize("/abc/../def/layer.tar"), "def/layer.tar");
        assert_eq!(resolve_link("bbb/layer.tar", Path::new("../aaa/layer.tar")), "aaa/layer.tar");
    }
}
