//! Fixed-length digests of text windows.
//!
//! Digests are dictionary keys for the window index, not a security boundary.
//! Two windows with equal digests are only *candidate* matches; callers compare
//! the underlying text before trusting a hit.

use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a text fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log fields
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Stateless hasher for text windows
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Hash a string fragment
    pub fn hash(fragment: &str) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(fragment.as_bytes());
        ContentDigest(hasher.finalize().into())
    }

    /// Hash a window of characters without collecting it into a `String`
    ///
    /// Produces the same digest as [`ContentHasher::hash`] on the equivalent
    /// string, since each char is fed as its UTF-8 encoding.
    pub fn hash_chars(window: &[char]) -> ContentDigest {
        let mut hasher = Sha256::new();
        let mut utf8 = [0u8; 4];
        for c in window {
            hasher.update(c.encode_utf8(&mut utf8).as_bytes());
        }
        ContentDigest(hasher.finalize().into())
    }
}
