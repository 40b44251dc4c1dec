//! Content-addressed memoization of OCR output.
//!
//! Keys are SHA-256 fingerprints of the uploaded bytes, so re-submitting the
//! same document skips OCR entirely. Entries live as long as the cache: there
//! is no expiry, no size bound and nothing is written to disk.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// SHA-256 digest of a byte sequence.
#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// In-memory map from document fingerprint to OCR text.
///
/// Backed by [`DashMap`] so OCR tasks and the session can share it without
/// an outer lock.
#[derive(Default)]
pub struct OcrCache {
    entries: DashMap<Fingerprint, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OcrCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Fingerprint) -> Option<String> {
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub fn insert(&self, key: Fingerprint, text: String) {
        self.entries.insert(key, text);
    }

    /// Return the cached text for `bytes`, computing and storing it on a miss.
    ///
    /// Only `Ok` values are stored; an error from `compute` is returned as-is
    /// and the next call will try again.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, bytes: &[u8], compute: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let key = Fingerprint::of(bytes);
        if let Some(text) = self.get(&key) {
            tracing::debug!(fingerprint = %key.short(), "OCR cache hit");
            return Ok(text);
        }

        tracing::debug!(fingerprint = %key.short(), "OCR cache miss");
        let text = compute().await?;
        self.insert(key, text.clone());
        Ok(text)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for OcrCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
