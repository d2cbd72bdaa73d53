// src/lock.rs

//! Advisory write lock for the cache image
//!
//! Any number of processes may read a cache image, but only the holder of
//! this lock may build or rewrite it. The lock is a `flock(LOCK_EX)` on a
//! lock file next to the image and is released when the [`CacheLock`] is
//! dropped.
//!
//! ```ignore
//! let lock = CacheLock::try_acquire("/var/cache/pkgcore/pkgcache.lock")?;
//! image::save(&cache, &image_path, &lock)?;
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive cache write lock
pub struct CacheLock {
    /// Kept open to keep the lock
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub const DEFAULT_PATH: &'static str = "/var/cache/pkgcore/pkgcache.lock";

    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::IoError(format!("{}: {}", path.display(), e)))
    }

    /// Acquire the lock, blocking until it is free
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;
        file.lock_exclusive()
            .map_err(|e| Error::LockError(format!("{}: {}", path.display(), e)))?;
        info!("Acquired cache lock at {:?}", path);
        Ok(Self { file, path })
    }

    /// Acquire the lock without blocking
    ///
    /// A lock held elsewhere is reported as [`Error::LockError`] so the
    /// caller can retry or abort.
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired cache lock at {:?}", path);
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Cache lock already held at {:?}", path);
                Err(Error::LockError(format!(
                    "{} is held by another process",
                    path.display()
                )))
            }
            Err(e) => Err(Error::LockError(format!("{}: {}", path.display(), e))),
        }
    }

    /// Whether some process currently holds the lock at `path`
    pub fn is_locked<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        let Ok(file) = File::open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }

    /// Whether this handle still owns its lock file
    pub fn is_held(&self) -> bool {
        self.file.metadata().is_ok() && self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        info!("Released cache lock at {:?}", self.path);
    }
}
