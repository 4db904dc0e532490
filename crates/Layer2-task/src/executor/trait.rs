//! Executor trait

use async_trait::async_trait;
use cmdcache_foundation::Result;
use std::ffi::OsStr;
use std::io::Write;

/// Executor trait - implement to add new execution backends
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` to completion, streaming its stdout into `stdout`
    ///
    /// Returns `Ok(())` only when the command exits with status zero.
    /// A write failure on `stdout` is reported as `Error::Output`.
    async fn execute(&self, command: &OsStr, stdout: &mut (dyn Write + Send)) -> Result<()>;

    /// Check if the executor is available
    fn is_available(&self) -> bool;

    /// Get executor name
    fn name(&self) -> &'static str;
}
