//! Advisory, cross-process, non-blocking lock of one collection.
//!
//! Backed by `flock(2)` on a lock file below the configured lock directory.
//! A leftover lock file alone does not mean the lock is held: the OS drops
//! the `flock` when the holding process dies, but only a clean release
//! unlinks the file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::Settings;
use crate::error::LockError;

#[derive(Debug, Clone)]
pub struct CollectionLock {
    path: PathBuf,
}

impl CollectionLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_collection(settings: &Settings, mission: &str, file_type: &str) -> Self {
        Self::new(settings.collection_lock_path(mission, file_type))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock or fails immediately with [`LockError::Contended`].
    pub fn acquire(&self) -> Result<CollectionLockGuard, LockError> {
        let file = self.open()?;
        self.lock_file(file)
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Open {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| LockError::Open {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Locks an opened lock file. The lock only counts if `file` is still
    /// the file at the lock path: a holder unlinks it before unlocking, so
    /// a descriptor opened before that release locks an orphaned inode.
    fn lock_file(&self, file: File) -> Result<CollectionLockGuard, LockError> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(code) if code == libc::EWOULDBLOCK => {
                    Err(LockError::Contended(self.path.clone()))
                }
                _ => Err(LockError::Open {
                    path: self.path.clone(),
                    source: err,
                }),
            };
        }

        let held = file.metadata().map_err(|e| LockError::Open {
            path: self.path.clone(),
            source: e,
        })?;
        let current = match std::fs::metadata(&self.path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(LockError::Open {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if !current.is_some_and(|m| m.dev() == held.dev() && m.ino() == held.ino()) {
            // Closing the descriptor drops the flock on the orphaned inode.
            debug!("Lock file {} was replaced while locking", self.path.display());
            return Err(LockError::Contended(self.path.clone()));
        }

        debug!("Acquired lock {}", self.path.display());
        Ok(CollectionLockGuard {
            file: Some(file),
            path: self.path.clone(),
        })
    }

    /// Runs `f` while holding the lock. The lock is released on every exit
    /// path, including unwinding.
    pub fn with_lock<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<LockError>,
    {
        let guard = self.acquire()?;
        let result = f();
        match (result, guard.release()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("{}", release_err);
                Err(e)
            }
        }
    }
}

/// Held collection lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct CollectionLockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl CollectionLockGuard {
    /// Removes the lock file and releases the OS-level lock.
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let removed = match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Release {
                path: self.path.clone(),
                source: e,
            }),
        };

        // SAFETY: the descriptor is owned by `file`, which is closed below.
        unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        drop(file);
        debug!("Released lock {}", self.path.display());
        removed
    }
}

impl Drop for CollectionLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("{}", e);
        }
    }
}
