//! Config - 캐시 설정
//!
//! Resolution order: built-in defaults, then the global `config.json`
//! (`~/.config/cmdcache/config.json`), then `CMDCACHE_*` environment
//! variables. The CLI applies its own flags on top.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// 설정 파일명
pub const CONFIG_FILE: &str = "config.json";

/// How long a committed entry stays visible. Not user-configurable.
pub const RETENTION_WINDOW: Duration = Duration::from_secs(60 * 60);

pub const ENV_CACHE_DIR: &str = "CMDCACHE_DIR";
pub const ENV_BACKEND: &str = "CMDCACHE_BACKEND";
pub const ENV_SHELL: &str = "CMDCACHE_SHELL";

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One file per entry, TTL from modification time
    #[default]
    Filesystem,
    /// SQLite table with per-row expiry
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "sqlite" | "kv" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!(
                "Unknown backend '{}' (expected 'filesystem' or 'sqlite')",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => f.write_str("filesystem"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// cmdcache 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// 저장소 종류
    #[serde(default)]
    pub backend: BackendKind,

    /// Root directory holding both backends' data
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Shell used to run commands (`<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cmdcache")
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            cache_dir: default_cache_dir(),
            shell: default_shell(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 설정 + 환경 변수
    ///
    /// Never fails: an unreadable config file is logged and skipped so the
    /// tool stays usable.
    pub fn load() -> Self {
        let store = JsonStore::global().ok();
        Self::load_with(store.as_ref(), |name| std::env::var(name).ok())
    }

    /// Load from an explicit config store and environment lookup
    pub fn load_with(store: Option<&JsonStore>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match store.map(|s| s.load_optional::<CacheConfig>(CONFIG_FILE)) {
            Some(Ok(Some(file_config))) => {
                debug!("Loaded config from {}", CONFIG_FILE);
                file_config
            }
            Some(Err(e)) => {
                warn!("Ignoring config file: {}", e);
                Self::default()
            }
            _ => Self::default(),
        };

        config.apply_env(env);
        config
    }

    /// 환경 변수 적용
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = env(ENV_CACHE_DIR).filter(|s| !s.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }

        if let Some(backend) = env(ENV_BACKEND).filter(|s| !s.trim().is_empty()) {
            match backend.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => warn!("Ignoring {}: {}", ENV_BACKEND, e),
            }
        }

        if let Some(shell) = env(ENV_SHELL).filter(|s| !s.trim().is_empty()) {
            self.shell = shell;
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Root of the filesystem backend
    pub fn fs_root(&self) -> PathBuf {
        self.cache_dir.join("fs")
    }

    /// Directory holding the SQLite database
    pub fn kv_dir(&self) -> PathBuf {
        self.cache_dir.join("kv")
    }
}
