//! # cmdcache-foundation
//!
//! Foundation layer for cmdcache:
//! - Key: 명령어 → 파일 이름으로 안전한 캐시 키 (SHA-256 + base64url)
//! - Storage: `CacheStore` trait과 두 구현 (SQLite, 파일시스템)
//! - Config: 저장소 위치/종류, 셸 설정
//! - Clock: 만료 계산용 시간 소스
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CacheStore (trait)                          │
//! │   read_into · writer/persist · wipe · close  │
//! │          ┌──────────┴──────────┐             │
//! │          ▼                     ▼             │
//! │     SqliteStore             FsStore          │
//! │  (row expires_at)     (file mtime + TTL)     │
//! └──────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{BackendKind, CacheConfig, CONFIG_FILE, RETENTION_WINDOW};

// ============================================================================
// Key / Clock
// ============================================================================
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::CacheKey;

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{CacheStore, FsStore, JsonStore, PendingEntry, SqliteStore, StoreHandle};
