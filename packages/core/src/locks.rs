//! Per-mount-path serialization.
//!
//! Two `mount()` calls racing on the same path would both see "not mounted"
//! and both invoke the helper, and a `mount()` interleaved with an
//! `unmount()` can leave the path half torn down. Every backend entry point
//! takes the lock for its path: health checks share the read side, mount and
//! unmount hold the write side for their whole check-then-act sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Registry of one async read/write lock per mount path.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop locks nobody is holding or waiting on.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(path.to_path_buf()).or_default().clone()
    }

    /// Shared access for read-only health checks.
    pub async fn read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        self.lock_for(path).read_owned().await
    }

    /// Exclusive access for state-changing operations.
    pub async fn write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(path).write_owned().await
    }

    /// Number of paths currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
