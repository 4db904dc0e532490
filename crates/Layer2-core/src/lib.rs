//! cmdcache-core: Cache-or-execute runtime
//!
//! Layer2 - 저장소(Layer1)와 실행기(Layer2-task)를 묶는 레이어
//!
//! # 주요 모듈
//!
//! - `controller`: 캐시 조회 → 미스 시 실행 → 성공 시 저장
//! - `tee`: 실행 출력을 호출자와 캐시 엔트리로 동시에 전달
//!
//! # 사용 예시
//!
//! ```ignore
//! use cmdcache_core::CommandCache;
//! use cmdcache_foundation::{CacheConfig, StoreHandle};
//! use cmdcache_task::{CommandLine, LocalExecutor};
//!
//! let store = StoreHandle::open(&CacheConfig::load());
//! let executor = LocalExecutor::new();
//! let command = CommandLine::from_args(["curl", "-s", "example.com"])?;
//!
//! let outcome = CommandCache::new(&*store, &executor)
//!     .run(&command, &mut std::io::stdout())
//!     .await?;
//! ```

pub mod controller;
pub mod tee;

pub use controller::{CommandCache, Outcome};
pub use tee::TeeWriter;
