//! Scoped ownership of the storage backend for one process run

use super::{CacheStore, FsStore, SqliteStore};
use crate::config::{BackendKind, CacheConfig};
use std::ops::Deref;
use tracing::{debug, error, warn};

/// Owns a backend and closes it when dropped
///
/// Every exit path of a run, including early returns such as a cache clear,
/// releases the store.
pub struct StoreHandle {
    inner: Box<dyn CacheStore>,
}

impl StoreHandle {
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    /// Open the backend selected by `config`
    ///
    /// A SQLite database that cannot be opened yields a detached store: the
    /// run continues uncached and `wipe` falls back to deleting the directory.
    pub fn open(config: &CacheConfig) -> Self {
        match config.backend {
            BackendKind::Filesystem => Self::new(FsStore::new(config.fs_root())),
            BackendKind::Sqlite => {
                let dir = config.kv_dir();
                match SqliteStore::open(&dir) {
                    Ok(store) => Self::new(store),
                    Err(e) => {
                        error!("failed to open database, not caching execution: {}", e);
                        Self::new(SqliteStore::detached(dir))
                    }
                }
            }
        }
    }
}

impl Deref for StoreHandle {
    type Target = dyn CacheStore;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        match self.inner.close() {
            Ok(()) => debug!("Released {} store", self.inner.name()),
            Err(e) => warn!("Failed to close {} store: {}", self.inner.name(), e),
        }
    }
}
