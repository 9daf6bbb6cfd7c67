//! Filesystem layer management.
//!
//! Each image is composed of ordered layers. Layers are content-addressed
//! by the SHA-256 hash of their stored bytes and unpacked bottom to top
//! into a root filesystem when a container is launched.

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use stowage_common::error::{Result, StowageError};
use stowage_common::types::Sha256Hash;

/// Prefix marking a deleted path in an upper layer.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker hiding everything a lower layer put in the same directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression applied to a layer tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar.
    None,
    /// Gzip-compressed tar.
    Gzip,
    /// Zstandard-compressed tar (recognized, not unpackable).
    Zstd,
}

impl Compression {
    /// Detects the compression from the first bytes of a layer.
    #[must_use]
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else if head.starts_with(&ZSTD_MAGIC) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Wraps `reader` so it yields the uncompressed tar stream.
    ///
    /// # Errors
    ///
    /// Returns an error for compressions without a decoder.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Self::None => Ok(Box::new(reader)),
            Self::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
            Self::Zstd => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "zstd-compressed layers are not supported",
            )),
        }
    }
}

/// A single filesystem layer as stored in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Content-addressed hash of this layer.
    pub digest: Sha256Hash,
    /// Size of the stored blob in bytes.
    pub size_bytes: u64,
    /// Compression of the stored blob.
    pub compression: Compression,
}

/// Unpacks a stored layer blob on top of `target`, applying whiteouts.
///
/// # Errors
///
/// Returns an error if the blob cannot be read or an entry cannot be
/// written below `target`.
pub fn unpack_layer(blob_path: &Path, layer: &Layer, target: &Path) -> Result<()> {
    tracing::debug!(
        blob = %blob_path.display(),
        target = %target.display(),
        digest = %layer.digest,
        "unpacking layer"
    );

    std::fs::create_dir_all(target).map_err(|e| StowageError::io(target, e))?;
    let file = std::fs::File::open(blob_path).map_err(|e| StowageError::io(blob_path, e))?;
    let reader = layer
        .compression
        .decoder(file)
        .map_err(|e| StowageError::io(blob_path, e))?;
    unpack_stream(reader, target).map_err(|e| StowageError::io(target, e))
}

/// Unpacks layers in order, bottom first.
///
/// `blob_path` maps a layer digest to the file holding its bytes.
///
/// # Errors
///
/// Returns the first error raised by `blob_path` or [`unpack_layer`].
pub fn unpack_layers<F>(layers: &[Layer], blob_path: F, target: &Path) -> Result<()>
where
    F: Fn(&Sha256Hash) -> Result<PathBuf>,
{
    for layer in layers {
        unpack_layer(&blob_path(&layer.digest)?, layer, target)?;
    }
    tracing::info!(layers = layers.len(), target = %target.display(), "root filesystem ready");
    Ok(())
}

fn unpack_stream<R: Read>(reader: R, target: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.set_unpack_xattrs(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            let _ = entry.unpack_in(target)?;
            continue;
        };

        if name == OPAQUE_WHITEOUT {
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            match safe_join(target, parent) {
                Some(dir) => clear_directory(&dir)?,
                None => {
                    tracing::warn!(path = %path.display(), "skipped opaque whiteout outside the root");
                }
            }
        } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            match (safe_join(target, parent), is_plain_name(hidden)) {
                (Some(dir), true) => remove_path(&dir.join(hidden))?,
                _ => {
                    tracing::warn!(path = %path.display(), "skipped whiteout outside the root");
                }
            }
        } else if !entry.unpack_in(target)? {
            tracing::warn!(path = %path.display(), "skipped layer entry escaping the root");
        }
    }
    Ok(())
}

/// Joins a relative archive path below `root`.
///
/// Refuses `..`, absolute components and any existing component that is a
/// symlink, so the result cannot resolve outside `root`.
fn safe_join(root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
        if std::fs::symlink_metadata(&joined).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return None;
        }
    }
    Some(joined)
}

/// Whether `name` is a single path component other than `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    matches!(
        Path::new(name).components().collect::<Vec<_>>().as_slice(),
        [Component::Normal(_)]
    )
}

fn remove_path(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn clear_directory(dir: &Path) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        remove_path(&entry?.path())?;
    }
    Ok(())
}
