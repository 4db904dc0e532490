//! Command line reconstruction
//!
//! The argument vector is quoted word by word and joined with single spaces.
//! The resulting bytes are both what the shell runs and what the cache key
//! is derived from, so two argv that the shell would treat differently never
//! share an entry. Arguments are taken as raw OS strings; bytes that are not
//! valid UTF-8 pass through untouched.

use cmdcache_foundation::{CacheKey, Error, Result};
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;

/// Shell-ready command line built from argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<OsString>,
    line: Vec<u8>,
}

impl CommandLine {
    /// Quote and join `args`
    ///
    /// Fails on an empty argument list or on arguments that cannot be
    /// represented in a shell word (NUL bytes).
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(Error::InvalidInput("No command provided".to_string()));
        }

        let words: Vec<Cow<'_, [u8]>> = args.iter().map(|a| os_bytes(a)).collect();
        let line = shlex::bytes::try_join(words.iter().map(|w| w.as_ref()))
            .map_err(|e| Error::InvalidInput(format!("Cannot quote command: {}", e)))?;

        Ok(Self { args, line })
    }

    /// The quoted command line as handed to the shell
    pub fn to_os_string(&self) -> OsString {
        bytes_to_os(&self.line)
    }

    /// The original arguments
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Raw key bytes handed to the storage backend
    pub fn key_bytes(&self) -> &[u8] {
        &self.line
    }

    /// Derived cache key
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.line)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.line))
    }
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    match s.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
fn bytes_to_os(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    OsStr::from_bytes(bytes).to_os_string()
}

#[cfg(not(unix))]
fn bytes_to_os(bytes: &[u8]) -> OsString {
    OsString::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_unquoted() {
        let cmd = CommandLine::from_args(["curl", "-X", "GET", "example.com"]).unwrap();
        assert_eq!(cmd.key_bytes(), b"curl -X GET example.com");
        assert_eq!(cmd.to_os_string(), "curl -X GET example.com");
        assert_eq!(cmd.args().len(), 4);
    }

    #[test]
    fn test_special_characters_quoted() {
        let args = ["echo", "-e", "test\\t", "it's", "$HOME"];
        let cmd = CommandLine::from_args(args).unwrap();
        let line = cmd.to_string();
        assert_ne!(line, args.join(" "));
        assert_eq!(shlex::split(&line).unwrap(), args);
    }

    #[test]
    fn test_grouping_changes_key() {
        let split = CommandLine::from_args(["printf", "%s\\n", "a", "b"]).unwrap();
        let grouped = CommandLine::from_args(["printf", "%s\\n", "a b"]).unwrap();
        assert_ne!(split.key_bytes(), grouped.key_bytes());
        assert_ne!(split.cache_key(), grouped.cache_key());
    }

    #[test]
    fn test_key_matches_line() {
        let cmd = CommandLine::from_args(["ls", "-la"]).unwrap();
        assert_eq!(cmd.key_bytes(), b"ls -la");
        assert_eq!(cmd.cache_key(), CacheKey::derive("ls -la"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_argument_kept() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'a', 0xff, b'b']);
        let cmd = CommandLine::from_args([OsString::from("printf"), raw.clone()]).unwrap();
        assert!(cmd.key_bytes().windows(3).any(|w| w == [b'a', 0xff, b'b']));
        assert_eq!(cmd.args()[1], raw);

        let other = OsString::from_vec(vec![b'a', 0xfe, b'b']);
        let cmd2 = CommandLine::from_args([OsString::from("printf"), other]).unwrap();
        assert_ne!(cmd.cache_key(), cmd2.cache_key());

        let words = shlex::bytes::split(cmd.key_bytes()).unwrap();
        assert_eq!(words, [b"printf".to_vec(), vec![b'a', 0xff, b'b']]);
    }

    #[test]
    fn test_empty_rejected() {
        let err = CommandLine::from_args(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_nul_rejected() {
        let err = CommandLine::from_args(["echo", "a\0b"]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
