//! SQLite Storage for cached command output
//!
//! 엔트리 저장:
//! - key: 명령어 원문 (BLOB)
//! - value: 캡처된 stdout (BLOB, incremental I/O로 스트리밍)
//! - expires_at: 만료 시각 (Unix ms)
//!
//! Every read filters on `expires_at`, so an expired row is indistinguishable
//! from a missing one without any sweep.

use super::{copy_entry, CacheStore, PendingEntry};
use crate::clock::{Clock, SystemClock};
use crate::config::RETENTION_WINDOW;
use crate::{Error, Result};
use rusqlite::blob::ZeroBlob;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database file name inside the store directory
pub const DB_FILE: &str = "cache.db";

/// SQLite-backed cache store
pub struct SqliteStore {
    /// Backing directory, `None` for in-memory databases
    dir: Option<PathBuf>,
    /// `None` once closed, or when the database could not be opened
    conn: Mutex<Option<Connection>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the database in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode so a reader does not block a concurrent run's commit
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::Storage(format!("Failed to set busy timeout: {}", e)))?;

        Self::with_connection(Some(dir), conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(None, conn)
    }

    /// A store whose database could not be opened
    ///
    /// Reads and writes fail with a storage error; `wipe` still works by
    /// deleting `dir`.
    pub fn detached(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            conn: Mutex::new(None),
            retention: RETENTION_WINDOW,
            clock: Arc::new(SystemClock),
        }
    }

    fn with_connection(dir: Option<PathBuf>, conn: Connection) -> Result<Self> {
        let store = Self {
            dir,
            conn: Mutex::new(Some(conn)),
            retention: RETENTION_WINDOW,
            clock: Arc::new(SystemClock),
        };

        store.initialize_schema()?;

        Ok(store)
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Backing directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Whether a live connection is held
    pub fn is_available(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Storage("Database is not available".to_string()))?;
        f(conn)
    }

    /// Create the entries table if it does not exist yet
    fn initialize_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                -- Cached command output
                CREATE TABLE IF NOT EXISTS entries (
                    key BLOB PRIMARY KEY,
                    value BLOB NOT NULL,
                    expires_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_entries_expires
                    ON entries(expires_at);
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))
        })
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expires_at(&self) -> i64 {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        self.now_millis().saturating_add(retention)
    }

    /// Upsert an entry, streaming `len` bytes from `reader` into the row
    fn store_entry(&self, key: &[u8], reader: &mut dyn Read, len: u64) -> Result<()> {
        let size = i32::try_from(len).map_err(|_| {
            Error::Storage(format!(
                "Entry of {} bytes is too large for the sqlite backend",
                len
            ))
        })?;
        let expires_at = self.expires_at();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, ZeroBlob(size), expires_at],
            )?;
            let rowid = tx.last_insert_rowid();

            {
                let mut blob = tx.blob_open(DatabaseName::Main, "entries", "value", rowid, false)?;
                let copied = io::copy(reader, &mut blob)
                    .map_err(|e| Error::Storage(format!("Failed to write entry: {}", e)))?;
                if copied != len {
                    return Err(Error::Storage(format!(
                        "Entry size changed while writing ({} of {} bytes)",
                        copied, len
                    )));
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Fallback for `wipe`: drop the connection and delete the directory
    fn remove_backing_dir(&self) -> Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Err(Error::Storage(
                "In-memory database has no directory to remove".to_string(),
            ));
        };

        self.lock().take();

        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

impl CacheStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn read_into(&self, key: &[u8], sink: &mut dyn Write) -> Result<()> {
        let now = self.now_millis();

        self.with_conn(|conn| {
            let rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM entries WHERE key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(rowid) = rowid else {
                return Err(Error::KeyNotFound);
            };

            let mut blob = conn.blob_open(DatabaseName::Main, "entries", "value", rowid, true)?;
            copy_entry(&mut blob, sink)?;
            Ok(())
        })
    }

    fn writer(&self, key: &[u8]) -> Result<Box<dyn PendingEntry + '_>> {
        if !self.is_available() {
            return Err(Error::Storage("Database is not available".to_string()));
        }

        // Spool to disk so large outputs are never held in memory
        let spool = tempfile::tempfile()
            .map_err(|e| Error::Storage(format!("Failed to create spool file: {}", e)))?;

        Ok(Box::new(SqlitePendingEntry {
            store: self,
            key: key.to_vec(),
            spool,
            len: 0,
        }))
    }

    fn persist(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut reader = value;
        self.store_entry(key, &mut reader, value.len() as u64)
    }

    fn sweep_expired(&self) -> Result<usize> {
        let now = self.now_millis();
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM entries WHERE expires_at <= ?1", params![now])
                .map_err(|e| Error::Storage(format!("Failed to sweep entries: {}", e)))
        })?;

        debug!("Swept {} expired entries", removed);
        Ok(removed)
    }

    fn wipe(&self) -> Result<()> {
        let cleared = self.with_conn(|conn| {
            conn.execute("DELETE FROM entries", [])?;
            Ok(())
        });

        match cleared {
            Ok(()) => {
                info!("Dropped all cache entries");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to clear database ({}), trying to delete directory.", e);
                self.remove_backing_dir()
            }
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
            debug!("Closed cache database");
        }
        Ok(())
    }
}

/// Pending entry spooled to an anonymous temp file until commit
struct SqlitePendingEntry<'a> {
    store: &'a SqliteStore,
    key: Vec<u8>,
    spool: File,
    len: u64,
}

impl Write for SqlitePendingEntry<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.spool.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.spool.flush()
    }
}

impl PendingEntry for SqlitePendingEntry<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::Storage(format!("Failed to rewind spool file: {}", e)))?;

        let SqlitePendingEntry {
            store,
            key,
            mut spool,
            len,
        } = *self;
        store.store_entry(&key, &mut spool, len)
    }

    fn abort(self: Box<Self>) -> Result<()> {
        // The anonymous spool file disappears with its handle
        Ok(())
    }
}
