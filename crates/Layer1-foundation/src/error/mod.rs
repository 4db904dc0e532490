//! Error types for cmdcache
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// cmdcache 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 캐시 조회
    // ========================================================================
    /// Logical miss: the entry is absent or older than the retention window
    #[error("Key not found")]
    KeyNotFound,

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// The caller's output destination rejected a write
    #[error("Failed to write output")]
    Output(#[source] std::io::Error),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Command failed to start: {0}")]
    SpawnFailed(String),

    #[error("Command exited with status {code}")]
    ExitStatus { code: i32 },

    #[error("Command terminated by signal {signal}")]
    Signaled { signal: i32 },

    // ========================================================================
    // 설정 / 입력
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a logical cache miss
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }

    /// Whether this error came from the user's own command
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::SpawnFailed(_) | Error::ExitStatus { .. } | Error::Signaled { .. }
        )
    }

    /// Whether this is a fault of the backing store
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Sqlite(_) | Error::Io(_))
    }

    /// Process exit code to report for this error
    ///
    /// Execution errors keep the child's code so the tool composes in shell
    /// pipelines; a child killed by a signal maps to `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ExitStatus { code } => *code,
            Error::Signaled { signal } => 128 + signal,
            _ => 1,
        }
    }

    /// Storage 에러 생성 헬퍼
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }
}
