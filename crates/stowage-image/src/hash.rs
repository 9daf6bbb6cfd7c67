//! SHA-256 content verification.
//!
//! Layers and configs are addressed by the digest of their bytes. Hashing
//! happens while data streams into the store so blobs are read only once.

use std::io::{self, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use stowage_common::error::{Result, StowageError};
use stowage_common::types::Sha256Hash;

/// Computes the SHA-256 hash of an in-memory buffer.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Sha256Hash {
    Sha256Hash::from_digest(Sha256::digest(data).as_slice())
}

/// Computes the SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| StowageError::io(path, e))?;
    let mut writer = HashingWriter::new(io::sink());
    let _ = io::copy(&mut file, &mut writer).map_err(|e| StowageError::io(path, e))?;
    Ok(writer.finish().1)
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `StowageError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(StowageError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Writer adapter that hashes and counts everything passed through it.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the digest and the number of bytes written.
    pub fn finish(self) -> (W, Sha256Hash, u64) {
        let digest = Sha256Hash::from_digest(self.hasher.finalize().as_slice());
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
