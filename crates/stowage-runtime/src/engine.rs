//! Runtime engine tying the image core together.
//!
//! The engine owns the repository store and the launcher. It runs the
//! import pipeline (read the archive, resolve the name, commit the entry)
//! and answers availability and run requests against either topology.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use stowage_common::config::StowageConfig;
use stowage_common::error::{Result, StowageError};
use stowage_common::types::{ImportState, Topology};
use stowage_image::archive;
use stowage_image::entry::RepositoryEntry;
use stowage_image::layer;
use stowage_image::reference::{self, CanonicalReference};
use stowage_image::store::RepositoryStore;
use uuid::Uuid;

use crate::exec::ExecOutput;
use crate::launcher::{CommandLauncher, LaunchRequest, Launcher};

/// Summary of a finished import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// Reference the image is now stored under.
    pub reference: CanonicalReference,
    /// Repository that received the image.
    pub topology: Topology,
    /// The committed entry.
    pub entry: RepositoryEntry,
    /// States the import went through, first to last.
    pub states: Vec<ImportState>,
    /// When the import finished.
    pub finished_at: DateTime<Utc>,
}

impl ImportReport {
    /// Final state of the import.
    #[must_use]
    pub fn state(&self) -> ImportState {
        self.states.last().copied().unwrap_or(ImportState::Unloaded)
    }
}

/// Tracks and logs an import through its states.
struct ImportTracker<'a> {
    topology: Topology,
    name: &'a str,
    states: Vec<ImportState>,
}

impl<'a> ImportTracker<'a> {
    fn new(topology: Topology, name: &'a str) -> Self {
        tracing::debug!(%topology, name, state = %ImportState::Unloaded, "import state");
        Self {
            topology,
            name,
            states: vec![ImportState::Unloaded],
        }
    }

    fn advance(&mut self, succeeded: bool) {
        let current = self.states.last().copied().unwrap_or(ImportState::Unloaded);
        if let Some(next) = current.advance(succeeded) {
            tracing::info!(
                topology = %self.topology,
                name = self.name,
                from = %current,
                to = %next,
                "import state"
            );
            self.states.push(next);
        }
    }
}

/// The engine that coordinates imports and runs.
pub struct Engine {
    config: StowageConfig,
    store: RepositoryStore,
    launcher: Box<dyn Launcher>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine using the launcher named in `config`.
    #[must_use]
    pub fn new(config: StowageConfig) -> Self {
        let launcher = Box::new(CommandLauncher::from_config(&config));
        Self::with_launcher(config, launcher)
    }

    /// Creates an engine with a custom launcher.
    #[must_use]
    pub fn with_launcher(config: StowageConfig, launcher: Box<dyn Launcher>) -> Self {
        let store = RepositoryStore::from_config(&config);
        Self {
            config,
            store,
            launcher,
        }
    }

    /// Returns the repository store.
    #[must_use]
    pub const fn store(&self) -> &RepositoryStore {
        &self.store
    }

    /// Maps a user-supplied name to its canonical reference.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::InvalidReference` for malformed names.
    pub fn resolve(&self, topology: Topology, name: &str) -> Result<CanonicalReference> {
        reference::resolve(topology, name)
    }

    /// Imports the archive at `archive_path` under `name`.
    ///
    /// Importing the same archive under the same name again replaces the
    /// entry with an equal one.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `CorruptArchive` if the archive cannot be read,
    /// `InvalidReference` for a malformed name, `Config` if `topology` is not
    /// configured and any store failure. No entry is left behind on error.
    pub fn import(
        &self,
        topology: Topology,
        archive_path: &Path,
        name: &str,
    ) -> Result<ImportReport> {
        let started = Instant::now();
        let mut tracker = ImportTracker::new(topology, name);
        tracker.advance(true);

        let outcome = self.import_inner(topology, archive_path, name);
        tracker.advance(outcome.is_ok());

        match outcome {
            Ok((reference, entry)) => {
                tracing::info!(
                    %topology,
                    %reference,
                    description = %entry.manifest.description(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "image loaded"
                );
                Ok(ImportReport {
                    reference,
                    topology,
                    entry,
                    states: tracker.states,
                    finished_at: Utc::now(),
                })
            }
            Err(err) => {
                tracing::error!(%topology, name, archive = %archive_path.display(), error = %err, "import failed");
                Err(err)
            }
        }
    }

    fn import_inner(
        &self,
        topology: Topology,
        archive_path: &Path,
        name: &str,
    ) -> Result<(CanonicalReference, RepositoryEntry)> {
        let reference = self.resolve(topology, name)?;
        // fail fast before reading a large archive
        let _ = self.store.root(topology)?;
        let contents = archive::read(archive_path)?;
        let entry = self.store.put(topology, &reference, &contents)?;
        Ok((reference, entry))
    }

    /// Whether `reference` has been imported into `topology`.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` if `topology` is not configured.
    pub fn is_available(&self, topology: Topology, reference: &CanonicalReference) -> Result<bool> {
        let available = self.store.exists(topology, reference)?;
        tracing::debug!(%topology, %reference, available, "availability query");
        Ok(available)
    }

    /// Runs `command` inside the stored image and returns its stdout.
    ///
    /// An empty `command` runs the image's entrypoint and default command.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Launch` if the reference is not available (no
    /// process is started then), the root filesystem cannot be prepared, or
    /// the launcher fails, exits non-zero or times out.
    pub fn run_and_capture(
        &self,
        topology: Topology,
        reference: &CanonicalReference,
        command: &[String],
    ) -> Result<String> {
        self.run(topology, reference, command).map(|output| output.stdout)
    }

    /// Like [`Engine::run_and_capture`] but returns the full output.
    ///
    /// # Errors
    ///
    /// See [`Engine::run_and_capture`].
    pub fn run(
        &self,
        topology: Topology,
        reference: &CanonicalReference,
        command: &[String],
    ) -> Result<ExecOutput> {
        if !self.is_available(topology, reference)? {
            return Err(StowageError::launch(
                reference,
                format!("image is not available in the {topology} repository"),
            ));
        }
        let entry = self.store.get(topology, reference).map_err(|e| match e {
            StowageError::NotFound { .. } | StowageError::Serialization { .. } => {
                StowageError::launch(reference, format!("image cannot be read: {e}"))
            }
            other => other,
        })?;
        let command = if command.is_empty() {
            entry
                .manifest
                .entrypoint
                .iter()
                .chain(&entry.manifest.cmd)
                .cloned()
                .collect()
        } else {
            command.to_vec()
        };

        let run_id = Uuid::new_v4();
        let scratch = self.scratch_dir(topology)?;
        std::fs::create_dir_all(&scratch).map_err(|e| StowageError::io(&scratch, e))?;
        let rootfs = tempfile::Builder::new()
            .prefix(&format!("rootfs-{run_id}-"))
            .tempdir_in(&scratch)
            .map_err(|e| StowageError::io(&scratch, e))?;
        tracing::info!(%run_id, %reference, rootfs = %rootfs.path().display(), "preparing root filesystem");

        layer::unpack_layers(
            &entry.layers,
            |digest| self.store.blob_path(topology, digest),
            rootfs.path(),
        )
        .map_err(|e| {
            StowageError::launch(reference, format!("could not prepare root filesystem: {e}"))
        })?;

        let output = self.launcher.launch(&LaunchRequest {
            reference,
            rootfs: rootfs.path(),
            command: &command,
            env: &entry.manifest.env,
            timeout: self.config.run_timeout(),
        });
        tracing::info!(%run_id, %reference, ok = output.is_ok(), "run finished");
        if let Err(e) = rootfs.close() {
            tracing::warn!(%run_id, error = %e, "could not remove root filesystem");
        }
        output
    }

    /// Removes the image stored under `name`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for a malformed name, `Config` if
    /// `topology` is not configured and `Io` on filesystem failures.
    pub fn remove(&self, topology: Topology, name: &str) -> Result<bool> {
        let reference = self.resolve(topology, name)?;
        self.store.remove(topology, &reference)
    }

    /// Lists the images in `topology`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `topology` is not configured and `Io` if the
    /// repository cannot be read.
    pub fn list(&self, topology: Topology) -> Result<Vec<RepositoryEntry>> {
        self.store.list(topology)
    }

    fn scratch_dir(&self, topology: Topology) -> Result<PathBuf> {
        match &self.config.scratch_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.config.repository_dir(topology)?.join("scratch")),
        }
    }
}
