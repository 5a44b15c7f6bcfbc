//! Advisory store lock.
//!
//! Parallel invocations against the same store serialize on an
//! exclusive file lock at `<store>/lock`, held for the full duration
//! of install, uninstall, and sync. `LEAF_DISABLE_LOCKS=1` bypasses
//! the lock entirely (tests only).

use fs2::FileExt;
use leaf_core::constants::{envvars, files};
use leaf_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long acquisition waits before failing with `LockHeld`.
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while the lock is held elsewhere.
const LOCK_RETRY: Duration = Duration::from_millis(200);

/// An acquired store lock; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: Option<File>,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock for a store root, waiting up to the timeout.
    pub fn acquire(store_root: &Path) -> Result<Self> {
        let path = store_root.join(files::LOCK);
        if std::env::var(envvars::DISABLE_LOCKS).is_ok() {
            debug!("store locking disabled");
            return Ok(Self { file: None, path });
        }
        std::fs::create_dir_all(store_root).map_err(|e| Error::io(store_root, e))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "store lock acquired");
                    return Ok(Self {
                        file: Some(file),
                        path,
                    });
                }
                Err(_) if start.elapsed() < LOCK_TIMEOUT => {
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(_) => {
                    warn!(path = %path.display(), "store lock acquisition timed out");
                    return Err(Error::LockHeld { path });
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(ref file) = self.file {
            let _ = fs2::FileExt::unlock(file);
            debug!(path = %self.path.display(), "store lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        drop(lock);
        let again = StoreLock::acquire(dir.path()).unwrap();
        drop(again);
        assert!(dir.path().join(files::LOCK).exists());
    }
}
