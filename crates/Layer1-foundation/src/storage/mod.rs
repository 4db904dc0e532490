//! Storage module for cmdcache
//!
//! - `db`: SQLite - 행마다 만료 시각을 저장하는 key-value 저장소
//! - `fs`: 파일 하나당 엔트리, 수정 시각으로 TTL 계산
//! - `handle`: 프로세스 실행 동안 저장소를 소유하고 종료 시 닫음
//! - `json`: JSON - 설정 파일 저장/로드

mod db;
mod fs;
mod handle;
mod json;

use crate::{Error, Result};
use std::io::{ErrorKind, Read, Write};

// SQLite Storage
pub use db::SqliteStore;

// Filesystem Storage
pub use fs::FsStore;

pub use handle::StoreHandle;

// JSON Storage (설정)
pub use json::JsonStore;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Capability set shared by every storage backend
///
/// Keys are the raw command bytes; each backend maps them into its own
/// address space. Expired entries must be reported as [`Error::KeyNotFound`],
/// never surfaced.
pub trait CacheStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Copy a live entry into `sink`
    ///
    /// Returns [`Error::KeyNotFound`] for absent or expired entries and
    /// [`Error::Output`] when `sink` rejects a write.
    fn read_into(&self, key: &[u8], sink: &mut dyn Write) -> Result<()>;

    /// Open a pending entry that only becomes readable on commit
    fn writer(&self, key: &[u8]) -> Result<Box<dyn PendingEntry + '_>>;

    /// Store a complete value in one call, replacing any previous entry
    fn persist(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut pending = self.writer(key)?;
        pending
            .write_all(value)
            .map_err(|e| Error::storage(format!("Failed to write entry: {}", e)))?;
        pending.commit()
    }

    /// Physically remove expired entries, returning how many were removed
    fn sweep_expired(&self) -> Result<usize>;

    /// Remove every entry. Wiping an empty or missing store succeeds.
    fn wipe(&self) -> Result<()>;

    /// Release resources. Safe to call more than once.
    fn close(&self) -> Result<()>;
}

/// Write handle for an entry that is not yet visible to readers
pub trait PendingEntry: Write + Send {
    /// Make the written bytes the entry for this key
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything written so far
    fn abort(self: Box<Self>) -> Result<()>;
}

/// Stream an entry to the caller, keeping read faults and sink faults apart
pub(crate) fn copy_entry<R: Read + ?Sized>(reader: &mut R, sink: &mut dyn Write) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::storage(format!("Failed to read entry: {}", e))),
        };
        sink.write_all(&buf[..n]).map_err(Error::Output)?;
        total += n as u64;
    }

    sink.flush().map_err(Error::Output)?;
    Ok(total)
}
