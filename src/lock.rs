//! Single-instance guard.
//!
//! Each source takes an exclusive advisory lock on its own lock file for
//! the duration of a run. A second invocation does not wait: it sees the
//! lock held and exits without touching the network, database or broker.
//! The lock is released when the guard is dropped, on every exit path.

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};

/// Held exclusive lock on a lock file.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Tries to take the lock without blocking.
    ///
    /// Returns `Ok(None)` when another instance holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<InstanceLock>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => Ok(Some(InstanceLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Closing the file releases the lock too; unlock explicitly so the
        // release does not depend on descriptor lifetime.
        let _ = self.file.unlock();
    }
}

/// Lock file for one source, e.g. `/tmp/aqmon-purpleair.lock`.
pub fn lock_path(lock_dir: &Path, source_name: &str) -> PathBuf {
    lock_dir.join(format!("aqmon-{}.lock", source_name))
}
