//! Output tee: caller first, cache entry second

use cmdcache_foundation::PendingEntry;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Writer that forwards every chunk to the caller and mirrors it into a
/// pending cache entry
///
/// The caller always gets the bytes before the cache does. If the cache side
/// fails, the failure is logged once and the entry is aborted; the caller's
/// stream is not interrupted. A failure on the caller side is returned as is.
pub struct TeeWriter<'a, W: Write + ?Sized> {
    primary: &'a mut W,
    pending: Option<Box<dyn PendingEntry + 'a>>,
}

impl<'a, W: Write + ?Sized> TeeWriter<'a, W> {
    pub fn new(primary: &'a mut W, pending: Option<Box<dyn PendingEntry + 'a>>) -> Self {
        Self { primary, pending }
    }

    /// Whether output is still being captured
    pub fn is_caching(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand back the pending entry, if capture survived
    pub fn into_pending(self) -> Option<Box<dyn PendingEntry + 'a>> {
        self.pending
    }

    fn drop_pending(&mut self, err: io::Error) {
        warn!("Failed to write cache entry, not caching execution: {}", err);
        if let Some(pending) = self.pending.take() {
            if let Err(e) = pending.abort() {
                debug!("Failed to discard cache entry: {}", e);
            }
        }
    }
}

impl<W: Write + ?Sized> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.primary.write(buf)?;
        if let Some(pending) = self.pending.as_mut() {
            if let Err(e) = pending.write_all(&buf[..n]) {
                self.drop_pending(e);
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        if let Some(pending) = self.pending.as_mut() {
            if let Err(e) = pending.flush() {
                self.drop_pending(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdcache_foundation::Result;
    use std::sync::{Arc, Mutex};

    /// Pending entry recording its bytes and how it ended
    #[derive(Clone, Default)]
    struct Recorder {
        bytes: Arc<Mutex<Vec<u8>>>,
        ended: Arc<Mutex<Option<&'static str>>>,
        fail_after: Option<usize>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut bytes = self.bytes.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if bytes.len() + buf.len() > limit {
                    return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
                }
            }
            bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PendingEntry for Recorder {
        fn commit(self: Box<Self>) -> Result<()> {
            *self.ended.lock().unwrap() = Some("commit");
            Ok(())
        }

        fn abort(self: Box<Self>) -> Result<()> {
            *self.ended.lock().unwrap() = Some("abort");
            Ok(())
        }
    }

    #[test]
    fn test_both_sides_receive_bytes() {
        let recorder = Recorder::default();
        let mut out = Vec::new();
        let mut tee = TeeWriter::new(&mut out, Some(Box::new(recorder.clone())));

        tee.write_all(b"hello ").unwrap();
        tee.write_all(b"world\n").unwrap();
        tee.flush().unwrap();
        assert!(tee.is_caching());
        tee.into_pending().unwrap().commit().unwrap();

        assert_eq!(out, b"hello world\n");
        assert_eq!(*recorder.bytes.lock().unwrap(), b"hello world\n");
        assert_eq!(*recorder.ended.lock().unwrap(), Some("commit"));
    }

    #[test]
    fn test_cache_failure_keeps_caller_stream() {
        let recorder = Recorder {
            fail_after: Some(4),
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut tee = TeeWriter::new(&mut out, Some(Box::new(recorder.clone())));

        tee.write_all(b"abc").unwrap();
        tee.write_all(b"defgh").unwrap();
        tee.write_all(b"ij").unwrap();
        assert!(!tee.is_caching());
        assert!(tee.into_pending().is_none());

        assert_eq!(out, b"abcdefghij");
        assert_eq!(*recorder.ended.lock().unwrap(), Some("abort"));
    }

    #[test]
    fn test_caller_failure_propagates() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let recorder = Recorder::default();
        let mut closed = Closed;
        let mut tee = TeeWriter::new(&mut closed, Some(Box::new(recorder.clone())));

        let err = tee.write_all(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(recorder.bytes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_without_pending() {
        let mut out = Vec::new();
        let mut tee = TeeWriter::new(&mut out, None);
        tee.write_all(b"plain").unwrap();
        assert!(!tee.is_caching());
        drop(tee);
        assert_eq!(out, b"plain");
    }
}
