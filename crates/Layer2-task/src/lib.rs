//! # cmdcache-task
//!
//! Command execution for cmdcache.
//!
//! ## Features
//!
//! - argv → 셸 명령어 문자열 재구성 (shlex quoting)
//! - 셸을 통한 로컬 실행, stdout 스트리밍
//! - 종료 코드/시그널 보존

pub mod command;
pub mod executor;

pub use command::CommandLine;
pub use executor::{Executor, LocalExecutor, LocalExecutorConfig};
