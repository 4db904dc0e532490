//! Local executor - runs a command line through a shell on the host
//!
//! Features:
//! - Real-time stdout streaming in bounded chunks
//! - stdin and stderr inherited from this process
//! - Exit status and signal tracking
//! - Child killed if the executing future is dropped

use crate::executor::Executor;
use async_trait::async_trait;
use cmdcache_foundation::{Error, Result};
use std::ffi::OsStr;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Size of one stdout read
const CHUNK_SIZE: usize = 32 * 1024;

/// Local executor configuration
#[derive(Debug, Clone)]
pub struct LocalExecutorConfig {
    /// Shell program
    pub shell: String,
    /// Flag that makes the shell run its next argument as a script
    pub shell_arg: String,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            shell_arg: "-c".to_string(),
        }
    }
}

impl LocalExecutorConfig {
    /// Use another shell with the same `-c` convention
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

/// Local executor that runs commands directly on the host
pub struct LocalExecutor {
    /// Configuration
    config: LocalExecutorConfig,
}

impl LocalExecutor {
    /// Create a new local executor running `bash -c`
    pub fn new() -> Self {
        Self {
            config: LocalExecutorConfig::default(),
        }
    }

    /// Create with configuration
    pub fn with_config(config: LocalExecutorConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &LocalExecutorConfig {
        &self.config
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a finished child's status onto the crate's error kinds
fn check_status(status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(Error::ExitStatus { code });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(Error::Signaled { signal });
        }
    }

    Err(Error::ExitStatus { code: 1 })
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, command: &OsStr, stdout: &mut (dyn Write + Send)) -> Result<()> {
        debug!("Executing with {}: {}", self.config.shell, command.to_string_lossy());

        let mut child = Command::new(&self.config.shell)
            .arg(&self.config.shell_arg)
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", self.config.shell, e)))?;

        let mut pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::SpawnFailed("stdout was not captured".to_string()))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = pipe.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            // Dropping `child` on this path kills the command
            stdout.write_all(&buf[..n]).map_err(Error::Output)?;
            stdout.flush().map_err(Error::Output)?;
        }

        let status = child.wait().await?;
        match check_status(status) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Command failed: {}", e);
                Err(e)
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
