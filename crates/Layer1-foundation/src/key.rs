//! Cache key derivation
//!
//! A key is the URL-safe base64 (no padding) encoding of the SHA-256 digest
//! of the command text, so it is always 43 characters from `[A-Za-z0-9_-]`
//! and can be used verbatim as a file name.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque, filesystem-safe identifier for a command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a command line
    pub fn derive(command: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(command.as_ref());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
