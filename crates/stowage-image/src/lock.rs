//! Advisory file locks serializing writers to a repository store.
//!
//! Locks are `flock(2)` locks on files under `<root>/locks`. They are held
//! for as long as the returned guard lives and released when it drops, also
//! when the holding process dies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use stowage_common::error::{Result, StowageError};

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once.
    Shared,
    /// A single holder.
    Exclusive,
}

/// A held lock. Dropping it unlocks.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _lock: Flock<File>,
}

impl LockGuard {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Blocks until `path` is locked in `mode`, creating the file if needed.
///
/// # Errors
///
/// Returns `StowageError::Io` if the file cannot be opened or locked.
pub fn acquire(path: &Path, mode: LockMode) -> Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StowageError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| StowageError::io(path, e))?;

    let arg = match mode {
        LockMode::Shared => FlockArg::LockShared,
        LockMode::Exclusive => FlockArg::LockExclusive,
    };
    tracing::trace!(path = %path.display(), ?mode, "acquiring lock");
    let lock = Flock::lock(file, arg)
        .map_err(|(_, errno)| StowageError::io(path, std::io::Error::from(errno)))?;
    Ok(LockGuard {
        path: path.to_path_buf(),
        _lock: lock,
    })
}

/// Tries to lock `path` without blocking. Returns `None` if it is held.
///
/// # Errors
///
/// Returns `StowageError::Io` for failures other than contention.
pub fn try_acquire(path: &Path, mode: LockMode) -> Result<Option<LockGuard>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StowageError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| StowageError::io(path, e))?;

    let arg = match mode {
        LockMode::Shared => FlockArg::LockSharedNonblock,
        LockMode::Exclusive => FlockArg::LockExclusiveNonblock,
    };
    match Flock::lock(file, arg) {
        Ok(lock) => Ok(Some(LockGuard {
            path: path.to_path_buf(),
            _lock: lock,
        })),
        Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
        Err((_, errno)) => Err(StowageError::io(path, std::io::Error::from(errno))),
    }
}
