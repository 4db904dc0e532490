//! Filesystem storage
//!
//! One regular file per entry under a root directory. The file name is the
//! derived [`CacheKey`] and the file's modification time is the entry's
//! creation time, so expiry needs no extra metadata.
//!
//! Writers stage output in a hidden temp file inside the root and rename it
//! into place on commit. Readers never see a partially written entry.

use super::{copy_entry, CacheStore, PendingEntry};
use crate::clock::{is_within_retention, Clock, SystemClock};
use crate::config::RETENTION_WINDOW;
use crate::key::CacheKey;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const PENDING_PREFIX: &str = ".pending-";

/// Filesystem-backed cache store
pub struct FsStore {
    root: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: RETENTION_WINDOW,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding the entry for `key`
    pub fn entry_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(CacheKey::derive(key).as_str())
    }

    fn ensure_root(&self) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.root).map_err(|e| {
            Error::storage(format!(
                "Failed to create cache directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    fn is_fresh(&self, modified: SystemTime) -> bool {
        is_within_retention(DateTime::<Utc>::from(modified), self.clock.now(), self.retention)
    }
}

impl CacheStore for FsStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn read_into(&self, key: &[u8], sink: &mut dyn Write) -> Result<()> {
        let path = self.entry_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::KeyNotFound),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to open {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let modified = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| Error::storage(format!("Failed to stat {}: {}", path.display(), e)))?;

        // Stale files stay on disk until the next sweep or wipe
        if !self.is_fresh(modified) {
            debug!("Entry {} is past retention", path.display());
            return Err(Error::KeyNotFound);
        }

        copy_entry(&mut file, sink)?;
        Ok(())
    }

    fn writer(&self, key: &[u8]) -> Result<Box<dyn PendingEntry + '_>> {
        self.ensure_root()?;

        let file = tempfile::Builder::new()
            .prefix(PENDING_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| Error::storage(format!("Failed to create pending entry: {}", e)))?;

        Ok(Box::new(FsPendingEntry {
            file,
            target: self.entry_path(key),
            clock: Arc::clone(&self.clock),
        }))
    }

    fn sweep_expired(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::storage(format!("Failed to list cache: {}", e))),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if self.is_fresh(modified) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
            }
        }

        debug!("Swept {} expired entries from {}", removed, self.root.display());
        Ok(removed)
    }

    fn wipe(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!(
                "Failed to remove {}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pending entry staged in a temp file next to its final location
struct FsPendingEntry {
    file: NamedTempFile,
    target: PathBuf,
    clock: Arc<dyn Clock>,
}

impl Write for FsPendingEntry {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl PendingEntry for FsPendingEntry {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| Error::storage(format!("Failed to flush entry: {}", e)))?;

        // mtime is the entry's creation time
        let created = SystemTime::from(self.clock.now());
        self.file
            .as_file()
            .set_modified(created)
            .map_err(|e| Error::storage(format!("Failed to stamp entry: {}", e)))?;

        let FsPendingEntry { file, target, .. } = *self;
        file.persist(&target).map_err(|e| {
            Error::storage(format!("Failed to commit {}: {}", target.display(), e.error))
        })?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.file
            .close()
            .map_err(|e| Error::storage(format!("Failed to discard pending entry: {}", e)))
    }
}
