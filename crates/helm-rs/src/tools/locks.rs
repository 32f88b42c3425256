//! Per-path write locks.
//!
//! Writes to the same file are serialized through a [`PathGuard`]. The
//! guard owns its lock, so it is released when dropped: on success, on
//! error, and when a timeout drops the write future mid-flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

/// Exclusive access to one path until dropped.
#[derive(Debug)]
pub struct PathGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        trace!("Released write lock on {}", self.path.display());
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(
                map.entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = lock.lock_owned().await;
        trace!("Acquired write lock on {}", path.display());
        PathGuard {
            path: path.to_path_buf(),
            _guard: guard,
        }
    }

    /// Whether `path` is currently locked.
    pub fn is_locked(&self, path: &Path) -> bool {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(path).is_some_and(|l| l.try_lock().is_err())
    }
}
