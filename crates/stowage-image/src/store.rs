//! Content-addressable repository store.
//!
//! Each topology has its own root with this layout:
//!
//! ```text
//! <root>/blobs/sha256/<hex>      layer and config blobs
//! <root>/refs/<hex>.json         one entry per reference, named by the
//!                                digest of the reference string
//! <root>/locks/<hex>.lock        per-reference writer locks
//! <root>/locks/gc.lock           store-wide lock, shared by writers and
//!                                held exclusively by garbage collection
//! <root>/tmp/                    staging area for blobs and entries
//! ```
//!
//! An entry becomes visible when its staged file is renamed over the ref
//! file. Readers take no locks; they see either the old entry or the new one.

use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use stowage_common::config::StowageConfig;
use stowage_common::constants::ENV_CENTRALIZED_REPOSITORY;
use stowage_common::error::{Result, StowageError};
use stowage_common::types::{Sha256Hash, Topology};
use tempfile::NamedTempFile;

use crate::archive::ArchiveContents;
use crate::entry::RepositoryEntry;
use crate::hash::{self, HashingWriter};
use crate::layer::Layer;
use crate::lock::{self, LockMode};
use crate::reference::CanonicalReference;

const GC_LOCK: &str = "gc.lock";

/// What a garbage collection pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Blobs deleted.
    pub removed_blobs: usize,
    /// Bytes freed by the deleted blobs.
    pub reclaimed_bytes: u64,
}

/// Paths inside one topology root.
#[derive(Debug, Clone)]
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    fn blob_path(&self, digest: &Sha256Hash) -> PathBuf {
        self.blobs_dir().join(digest.as_hex())
    }

    fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    fn ref_path(&self, reference: &CanonicalReference) -> PathBuf {
        let key = hash::hash_bytes(reference.to_string().as_bytes());
        self.refs_dir().join(format!("{}.json", key.as_hex()))
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn reference_lock(&self, reference: &CanonicalReference) -> PathBuf {
        let key = hash::hash_bytes(reference.to_string().as_bytes());
        self.locks_dir().join(format!("{}.lock", key.as_hex()))
    }

    fn gc_lock(&self) -> PathBuf {
        self.locks_dir().join(GC_LOCK)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn ensure(&self) -> Result<()> {
        for dir in [
            self.blobs_dir(),
            self.refs_dir(),
            self.locks_dir(),
            self.tmp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| StowageError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Writes a blob unless it is already present. Returns whether it wrote.
    fn store_blob<F>(&self, digest: &Sha256Hash, fill: F) -> Result<bool>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let target = self.blob_path(digest);
        if target.exists() {
            tracing::debug!(%digest, "blob already present");
            return Ok(false);
        }

        let tmp_dir = self.tmp_dir();
        let staged = NamedTempFile::new_in(&tmp_dir).map_err(|e| StowageError::io(&tmp_dir, e))?;
        let mut writer = HashingWriter::new(BufWriter::new(staged));
        let _ = fill(&mut writer)?;
        let (buffered, actual, size) = writer.finish();
        let staged = buffered
            .into_inner()
            .map_err(|e| StowageError::io(&tmp_dir, e.into_error()))?;

        if actual != *digest {
            return Err(StowageError::HashMismatch {
                resource: format!("blob {digest}"),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        staged
            .as_file()
            .sync_all()
            .map_err(|e| StowageError::io(staged.path(), e))?;
        let _ = staged
            .persist(&target)
            .map_err(|e| StowageError::io(&target, e.error))?;
        tracing::debug!(%digest, size, "blob stored");
        Ok(true)
    }

    fn write_entry(&self, entry: &RepositoryEntry) -> Result<()> {
        let target = self.ref_path(&entry.reference);
        let json = serde_json::to_vec_pretty(entry)?;
        let tmp_dir = self.tmp_dir();
        let mut staged =
            NamedTempFile::new_in(&tmp_dir).map_err(|e| StowageError::io(&tmp_dir, e))?;
        staged
            .write_all(&json)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| StowageError::io(staged.path(), e))?;
        let _ = staged
            .persist(&target)
            .map_err(|e| StowageError::io(&target, e.error))?;
        Ok(())
    }

    fn read_entry(path: &Path) -> Result<RepositoryEntry> {
        let content = std::fs::read(path).map_err(|e| StowageError::io(path, e))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Every ref file with its parse result.
    fn entries(&self) -> Result<Vec<(PathBuf, Result<RepositoryEntry>)>> {
        let dir = self.refs_dir();
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StowageError::io(&dir, e)),
        };
        let mut entries = Vec::new();
        for item in read_dir {
            let path = item.map_err(|e| StowageError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let entry = Self::read_entry(&path);
                entries.push((path, entry));
            }
        }
        Ok(entries)
    }
}

/// Image repositories for both topologies.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    local: PathBuf,
    centralized: Option<PathBuf>,
}

impl RepositoryStore {
    /// Creates a store over the given roots. Nothing is touched on disk
    /// until the first write.
    #[must_use]
    pub fn new(local: impl Into<PathBuf>, centralized: Option<PathBuf>) -> Self {
        Self {
            local: local.into(),
            centralized,
        }
    }

    /// Creates a store over the repositories named in `config`.
    #[must_use]
    pub fn from_config(config: &StowageConfig) -> Self {
        Self::new(
            config.local_repository_dir.clone(),
            config.centralized_repository_dir.clone(),
        )
    }

    /// Returns the root directory backing `topology`.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` for `Centralized` when no centralized
    /// repository is configured.
    pub fn root(&self, topology: Topology) -> Result<&Path> {
        match topology {
            Topology::Local => Ok(&self.local),
            Topology::Centralized => {
                self.centralized
                    .as_deref()
                    .ok_or_else(|| StowageError::Config {
                        message: format!(
                            "centralized repository is not configured (set \
                             centralizedRepositoryDir or {ENV_CENTRALIZED_REPOSITORY})"
                        ),
                    })
            }
        }
    }

    fn layout(&self, topology: Topology) -> Result<Layout> {
        Ok(Layout {
            root: self.root(topology)?.to_path_buf(),
        })
    }

    /// Path of a stored blob.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` if `topology` is not configured.
    pub fn blob_path(&self, topology: Topology, digest: &Sha256Hash) -> Result<PathBuf> {
        Ok(self.layout(topology)?.blob_path(digest))
    }

    /// Stores an image under `reference`, replacing any previous entry.
    ///
    /// Blocks while another writer holds the same reference. On failure no
    /// entry is committed and blobs written by this call are collected.
    ///
    /// # Errors
    ///
    /// Returns `Io` on filesystem failures, `HashMismatch` if a blob does
    /// not match its digest and `Config` if `topology` is not configured.
    pub fn put(
        &self,
        topology: Topology,
        reference: &CanonicalReference,
        contents: &ArchiveContents,
    ) -> Result<RepositoryEntry> {
        let layout = self.layout(topology)?;
        layout.ensure()?;

        let _writer = lock::acquire(&layout.reference_lock(reference), LockMode::Exclusive)?;
        let outcome = {
            let _gc = lock::acquire(&layout.gc_lock(), LockMode::Shared)?;
            Self::commit(&layout, reference, contents)
        };

        match outcome {
            Ok(entry) => {
                tracing::info!(
                    %topology,
                    %reference,
                    image = %entry.id.short(),
                    layers = entry.layers.len(),
                    "entry committed"
                );
                Ok(entry)
            }
            Err(err) => {
                tracing::warn!(%topology, %reference, error = %err, "import failed, collecting blobs");
                if let Err(gc_err) = self.collect_garbage(topology) {
                    tracing::warn!(%topology, error = %gc_err, "garbage collection failed");
                }
                Err(err)
            }
        }
    }

    fn commit(
        layout: &Layout,
        reference: &CanonicalReference,
        contents: &ArchiveContents,
    ) -> Result<RepositoryEntry> {
        let mut layers = Vec::with_capacity(contents.layers.len());
        for blob in &contents.layers {
            let _ = layout.store_blob(&blob.digest, |w| blob.copy_to(w))?;
            layers.push(Layer {
                digest: blob.digest.clone(),
                size_bytes: blob.size_bytes,
                compression: blob.compression,
            });
        }

        let config = contents.manifest.config_digest.clone();
        let _ = layout.store_blob(&config, |w| {
            w.write_all(&contents.config)
                .map_err(|e| StowageError::io(layout.tmp_dir(), e))?;
            Ok(contents.config.len() as u64)
        })?;

        let entry = RepositoryEntry {
            reference: reference.clone(),
            id: contents.manifest.image_id(),
            manifest: contents.manifest.clone(),
            layers,
            config,
            size_bytes: contents.size_bytes(),
            imported_at: Utc::now(),
        };
        layout.write_entry(&entry)?;
        Ok(entry)
    }

    /// Whether `reference` has a committed entry.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` if `topology` is not configured.
    pub fn exists(&self, topology: Topology, reference: &CanonicalReference) -> Result<bool> {
        Ok(self.layout(topology)?.ref_path(reference).is_file())
    }

    /// Reads the entry stored under `reference`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no entry, `Serialization` if it cannot
    /// be parsed and `Config` if `topology` is not configured.
    pub fn get(
        &self,
        topology: Topology,
        reference: &CanonicalReference,
    ) -> Result<RepositoryEntry> {
        let path = self.layout(topology)?.ref_path(reference);
        match Layout::read_entry(&path) {
            Err(StowageError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Err(StowageError::NotFound {
                    kind: "image",
                    id: reference.to_string(),
                })
            }
            other => other,
        }
    }

    /// Lists committed entries sorted by reference. Unreadable entries are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the refs directory cannot be read and `Config` if
    /// `topology` is not configured.
    pub fn list(&self, topology: Topology) -> Result<Vec<RepositoryEntry>> {
        let mut entries: Vec<RepositoryEntry> = self
            .layout(topology)?
            .entries()?
            .into_iter()
            .filter_map(|(path, entry)| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(entries)
    }

    /// Removes the entry for `reference` and collects its blobs. Removing
    /// an absent reference is not an error. Returns whether an entry existed.
    ///
    /// A garbage collection failure after the entry is gone is logged, not
    /// returned; the blobs are reclaimed by a later collection.
    ///
    /// # Errors
    ///
    /// Returns `Io` on filesystem failures and `Config` if `topology` is not
    /// configured.
    pub fn remove(&self, topology: Topology, reference: &CanonicalReference) -> Result<bool> {
        let layout = self.layout(topology)?;
        let path = layout.ref_path(reference);
        if !path.exists() {
            tracing::debug!(%topology, %reference, "nothing to remove");
            return Ok(false);
        }

        let removed = {
            let _writer = lock::acquire(&layout.reference_lock(reference), LockMode::Exclusive)?;
            match std::fs::remove_file(&path) {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(StowageError::io(&path, e)),
            }
        };
        if removed {
            tracing::info!(%topology, %reference, "entry removed");
            if let Err(gc_err) = self.collect_garbage(topology) {
                tracing::warn!(%topology, error = %gc_err, "garbage collection failed");
            }
        }
        Ok(removed)
    }

    /// Deletes blobs no entry refers to, and stale staging files.
    ///
    /// Waits for in-flight writers to finish first. Refuses to delete
    /// anything while an entry cannot be read, since its blobs are unknown.
    ///
    /// # Errors
    ///
    /// Returns `Io` on filesystem failures, `Serialization` if an entry is
    /// unreadable and `Config` if `topology` is not configured.
    pub fn collect_garbage(&self, topology: Topology) -> Result<GcReport> {
        let layout = self.layout(topology)?;
        if !layout.root.exists() {
            return Ok(GcReport::default());
        }
        let _gc = lock::acquire(&layout.gc_lock(), LockMode::Exclusive)?;

        let mut live = HashSet::new();
        for (_, entry) in layout.entries()? {
            live.extend(entry?.blobs().cloned());
        }

        let mut report = GcReport::default();
        let blobs_dir = layout.blobs_dir();
        if blobs_dir.exists() {
            let read_dir =
                std::fs::read_dir(&blobs_dir).map_err(|e| StowageError::io(&blobs_dir, e))?;
            for item in read_dir {
                let path = item.map_err(|e| StowageError::io(&blobs_dir, e))?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let keep = Sha256Hash::from_hex(name).is_ok_and(|digest| live.contains(&digest));
                if keep {
                    continue;
                }
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                std::fs::remove_file(&path).map_err(|e| StowageError::io(&path, e))?;
                report.removed_blobs += 1;
                report.reclaimed_bytes += size;
            }
        }

        let tmp_dir = layout.tmp_dir();
        if let Ok(read_dir) = std::fs::read_dir(&tmp_dir) {
            for item in read_dir.flatten() {
                let path = item.path();
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::debug!(path = %path.display(), error = %e, "could not remove staging file");
                }
            }
        }

        tracing::info!(
            %topology,
            removed_blobs = report.removed_blobs,
            reclaimed_bytes = report.reclaimed_bytes,
            "garbage collection finished"
        );
        Ok(report)
    }
}
