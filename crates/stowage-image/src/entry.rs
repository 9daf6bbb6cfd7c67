//! Repository entries: what the store records for each imported image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_common::types::{ImageId, Sha256Hash};

use crate::archive::ImageManifest;
use crate::layer::Layer;
use crate::reference::CanonicalReference;

/// A committed image in a repository store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Name the image is stored under.
    pub reference: CanonicalReference,
    /// Identifier derived from the config digest.
    pub id: ImageId,
    /// Image metadata read from the archive.
    pub manifest: ImageManifest,
    /// Layers, bottom first.
    pub layers: Vec<Layer>,
    /// Digest of the stored image config blob.
    pub config: Sha256Hash,
    /// Total size of the layer blobs in bytes.
    pub size_bytes: u64,
    /// When the import committed.
    pub imported_at: DateTime<Utc>,
}

impl RepositoryEntry {
    /// Whether two entries hold the same image, ignoring import time.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.reference == other.reference
            && self.id == other.id
            && self.manifest == other.manifest
            && self.layers == other.layers
            && self.config == other.config
    }

    /// Digests of every blob the entry depends on.
    pub fn blobs(&self) -> impl Iterator<Item = &Sha256Hash> {
        self.layers
            .iter()
            .map(|l| &l.digest)
            .chain(std::iter::once(&self.config))
    }
}
