//! Cache-or-execute controller
//!
//! 흐름:
//! 1. 캐시 조회 - 살아있는 엔트리가 있으면 그대로 출력하고 종료
//! 2. 미스 - 명령 실행, 출력은 호출자와 pending 엔트리로 동시에 전달
//! 3. 성공(종료 코드 0)일 때만 commit, 실패 시 abort
//!
//! Storage faults never stop the command from running; they only cost the
//! cache. The exception is a read that fails after part of an entry already
//! reached the caller: running the command then would append fresh output to
//! a truncated replay, so the fault is returned instead. Errors from the
//! command itself and from the caller's output are returned.

use crate::tee::TeeWriter;
use cmdcache_foundation::{CacheStore, Error, Result};
use cmdcache_task::{CommandLine, Executor};
use std::io::{self, Write};
use tracing::{debug, error, info, warn};

/// How a run was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Output replayed from a live entry, nothing executed
    Hit,
    /// Command executed; `cached` tells whether its output was committed
    Executed { cached: bool },
}

impl Outcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Outcome::Hit)
    }
}

/// Serves commands from a store, executing on a miss
pub struct CommandCache<'a> {
    store: &'a dyn CacheStore,
    executor: &'a dyn Executor,
}

impl<'a> CommandCache<'a> {
    pub fn new(store: &'a dyn CacheStore, executor: &'a dyn Executor) -> Self {
        Self { store, executor }
    }

    /// Write the output of `command` to `output`, from cache when possible
    pub async fn run<W: Write + Send>(
        &self,
        command: &CommandLine,
        output: &mut W,
    ) -> Result<Outcome> {
        if self.lookup(command, output)? {
            return Ok(Outcome::Hit);
        }
        self.execute_and_cache(command, output).await
    }

    /// Replay a live entry into `output`; `Ok(false)` means execute
    fn lookup<W: Write + Send>(&self, command: &CommandLine, output: &mut W) -> Result<bool> {
        let mut sink = CountingWriter::new(output);
        match self.store.read_into(command.key_bytes(), &mut sink) {
            Ok(()) => {
                debug!("Cache hit ({}): {}", self.store.name(), command);
                Ok(true)
            }
            Err(Error::KeyNotFound) => {
                debug!("Cache miss ({}): {}", self.store.name(), command);
                Ok(false)
            }
            Err(e @ Error::Output(_)) => Err(e),
            Err(e) if sink.written > 0 => {
                error!(
                    "Failed to read cache after {} bytes were written: {}",
                    sink.written, e
                );
                Err(e)
            }
            Err(e) => {
                error!("Failed to read cache, executing instead: {}", e);
                Ok(false)
            }
        }
    }

    async fn execute_and_cache<W: Write + Send>(
        &self,
        command: &CommandLine,
        output: &mut W,
    ) -> Result<Outcome> {
        let pending = match self.store.writer(command.key_bytes()) {
            Ok(pending) => Some(pending),
            Err(e) => {
                error!("Failed to open cache entry, not caching execution: {}", e);
                None
            }
        };

        let mut tee = TeeWriter::new(output, pending);
        let line = command.to_os_string();
        let result = self.executor.execute(&line, &mut tee).await;
        let pending = tee.into_pending();

        if let Err(e) = result {
            if let Some(pending) = pending {
                if let Err(abort_err) = pending.abort() {
                    debug!("Failed to discard cache entry: {}", abort_err);
                }
            }
            return Err(e);
        }

        let Some(pending) = pending else {
            return Ok(Outcome::Executed { cached: false });
        };

        match pending.commit() {
            Ok(()) => {
                info!("Cached output of: {}", command);
                Ok(Outcome::Executed { cached: true })
            }
            Err(e) => {
                warn!("Failed to commit cache entry: {}", e);
                Ok(Outcome::Executed { cached: false })
            }
        }
    }
}

/// Caller sink that remembers how many bytes it accepted
struct CountingWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    written: u64,
}

impl<'a, W: Write + ?Sized> CountingWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write + ?Sized> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmdcache_foundation::{FsStore, ManualClock, PendingEntry, SqliteStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::ffi::OsStr;
    use std::sync::Arc;
    use std::time::Duration;

    /// Executor that writes fixed output and counts invocations
    struct MockExecutor {
        output: Vec<u8>,
        exit_code: i32,
        calls: AtomicUsize,
    }

    impl MockExecutor {
        fn new(output: &[u8]) -> Self {
            Self {
                output: output.to_vec(),
                exit_code: 0,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(output: &[u8], exit_code: i32) -> Self {
            Self {
                exit_code,
                ..Self::new(output)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(&self, _command: &OsStr, stdout: &mut (dyn Write + Send)) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Two chunks so the tee sees more than one write
            let (head, tail) = self.output.split_at(self.output.len() / 2);
            stdout.write_all(head).map_err(Error::Output)?;
            stdout.write_all(tail).map_err(Error::Output)?;
            stdout.flush().map_err(Error::Output)?;
            match self.exit_code {
                0 => Ok(()),
                code => Err(Error::ExitStatus { code }),
            }
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    /// Store whose every operation fails
    struct FaultyStore;

    impl CacheStore for FaultyStore {
        fn name(&self) -> &'static str {
            "faulty"
        }
        fn read_into(&self, _key: &[u8], _sink: &mut dyn Write) -> Result<()> {
            Err(Error::storage("corrupt index"))
        }
        fn writer(&self, _key: &[u8]) -> Result<Box<dyn PendingEntry + '_>> {
            Err(Error::storage("read-only filesystem"))
        }
        fn sweep_expired(&self) -> Result<usize> {
            Err(Error::storage("read-only filesystem"))
        }
        fn wipe(&self) -> Result<()> {
            Err(Error::storage("read-only filesystem"))
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Store holding a live entry whose read breaks halfway through
    struct TruncatedStore {
        value: &'static [u8],
    }

    impl CacheStore for TruncatedStore {
        fn name(&self) -> &'static str {
            "truncated"
        }
        fn read_into(&self, _key: &[u8], sink: &mut dyn Write) -> Result<()> {
            let half = &self.value[..self.value.len() / 2];
            sink.write_all(half).map_err(Error::Output)?;
            Err(Error::storage("I/O error in the middle of the entry"))
        }
        fn writer(&self, _key: &[u8]) -> Result<Box<dyn PendingEntry + '_>> {
            Err(Error::storage("read-only filesystem"))
        }
        fn sweep_expired(&self) -> Result<usize> {
            Ok(0)
        }
        fn wipe(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn cmd(args: &[&str]) -> CommandLine {
        CommandLine::from_args(args.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn test_second_run_is_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let executor = MockExecutor::new(b"test\n");
        let cache = CommandCache::new(&store, &executor);
        let command = cmd(&["echo", "test"]);

        let mut first = Vec::new();
        let outcome = cache.run(&command, &mut first).await.unwrap();
        assert_eq!(outcome, Outcome::Executed { cached: true });

        let mut second = Vec::new();
        let outcome = cache.run(&command, &mut second).await.unwrap();
        assert!(outcome.is_hit());

        assert_eq!(executor.calls(), 1);
        assert_eq!(first, b"test\n");
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_distinct_commands_do_not_share() {
        let store = SqliteStore::in_memory().unwrap();
        let executor = MockExecutor::new(b"out\n");
        let cache = CommandCache::new(&store, &executor);

        let mut out = Vec::new();
        cache.run(&cmd(&["ls", "-l"]), &mut out).await.unwrap();
        cache.run(&cmd(&["ls", "-la"]), &mut out).await.unwrap();
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let executor = MockExecutor::failing(b"partial\n", 2);
        let cache = CommandCache::new(&store, &executor);
        let command = cmd(&["false"]);

        for _ in 0..2 {
            let mut out = Vec::new();
            let err = cache.run(&command, &mut out).await.unwrap_err();
            assert!(matches!(err, Error::ExitStatus { code: 2 }));
            assert_eq!(out, b"partial\n");
        }

        assert_eq!(executor.calls(), 2);
        let mut stored = Vec::new();
        assert!(store
            .read_into(command.key_bytes(), &mut stored)
            .unwrap_err()
            .is_key_not_found());
    }

    #[tokio::test]
    async fn test_expired_entry_reexecutes() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let store = FsStore::new(dir.path()).with_clock(clock.clone());
        let executor = MockExecutor::new(b"now\n");
        let cache = CommandCache::new(&store, &executor);
        let command = cmd(&["date"]);

        let mut out = Vec::new();
        cache.run(&command, &mut out).await.unwrap();

        clock.advance(Duration::from_secs(59 * 60));
        assert!(cache.run(&command, &mut out).await.unwrap().is_hit());

        clock.advance(Duration::from_secs(2 * 60));
        let outcome = cache.run(&command, &mut out).await.unwrap();
        assert_eq!(outcome, Outcome::Executed { cached: true });
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_expiry_reexecutes() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SqliteStore::in_memory().unwrap().with_clock(clock.clone());
        let executor = MockExecutor::new(b"x\n");
        let cache = CommandCache::new(&store, &executor);
        let command = cmd(&["uptime"]);

        let mut out = Vec::new();
        cache.run(&command, &mut out).await.unwrap();
        clock.advance(Duration::from_secs(3601));
        assert!(!cache.run(&command, &mut out).await.unwrap().is_hit());
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_storage_fault_still_executes() {
        let store = FaultyStore;
        let executor = MockExecutor::new(b"fine\n");
        let cache = CommandCache::new(&store, &executor);

        let mut out = Vec::new();
        let outcome = cache.run(&cmd(&["echo", "fine"]), &mut out).await.unwrap();
        assert_eq!(outcome, Outcome::Executed { cached: false });
        assert_eq!(out, b"fine\n");
    }

    #[tokio::test]
    async fn test_output_error_on_hit_propagates() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let command = cmd(&["echo", "x"]);
        store.persist(command.key_bytes(), b"x\n").unwrap();

        let executor = MockExecutor::new(b"x\n");
        let cache = CommandCache::new(&store, &executor);
        let err = cache.run(&command, &mut Closed).await.unwrap_err();
        assert!(matches!(err, Error::Output(_)));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let executor = MockExecutor::new(b"");
        let cache = CommandCache::new(&store, &executor);
        let command = cmd(&["true"]);

        let mut out = Vec::new();
        cache.run(&command, &mut out).await.unwrap();
        assert!(cache.run(&command, &mut out).await.unwrap().is_hit());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_partial_replay_is_not_followed_by_execution() {
        let store = TruncatedStore { value: b"cached\n" };
        let executor = MockExecutor::new(b"cached\n");
        let cache = CommandCache::new(&store, &executor);

        let mut out = Vec::new();
        let err = cache.run(&cmd(&["echo", "cached"]), &mut out).await.unwrap_err();

        assert!(err.is_storage());
        assert_eq!(executor.calls(), 0);
        assert_eq!(out, b"cac");
    }
}
