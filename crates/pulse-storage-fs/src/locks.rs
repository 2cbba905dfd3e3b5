//! Per-path async lock registry.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Lazily created async mutex per absolute file path.
///
/// Entries are never evicted. Share one registry through `Arc` between
/// storage instances that point at the same directory.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding `path`. Relative paths resolve against the current
    /// directory, so both spellings of a path share one lock.
    pub fn lock_for(&self, path: &Path) -> io::Result<Arc<Mutex<()>>> {
        let key = std::path::absolute(path)?;
        Ok(self.locks.entry(key).or_default().clone())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
