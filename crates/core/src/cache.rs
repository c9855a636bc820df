use crate::question::Question;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, Instant};

/// Content hash of (question text, type tag, options text). Exact and
/// whitespace-sensitive; each field is length-prefixed so boundaries between
/// fields cannot be shifted to produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(text: &str, kind: &str, options: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [text, kind, options] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        let hex = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Self(hex)
    }

    pub fn of(question: &Question) -> Self {
        Self::new(&question.text, &question.kind, &question.options)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Answer cache keyed by fingerprint. Callers treat any `CacheError` as a miss.
#[async_trait]
pub trait AnswerCache: Send + Sync {
    /// `None` when absent or expired. Expired entries are evicted here.
    async fn get(&self, key: &Fingerprint) -> Result<Option<String>, CacheError>;

    /// Insert or overwrite.
    async fn set(&self, key: Fingerprint, answer: String, ttl: Duration)
    -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &Fingerprint) -> Result<bool, CacheError>;

    /// Drop every entry and return how many there were.
    async fn clear(&self) -> Result<usize, CacheError>;

    async fn purge_expired(&self) -> Result<usize, CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    answer: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process cache with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryAnswerCache {
    entries: DashMap<Fingerprint, CacheEntry>,
}

impl MemoryAnswerCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnswerCache for MemoryAnswerCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.answer.clone())),
            Some(_) => {}
        }
        // Read guard must be gone before removing from the same shard.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        tracing::debug!(key = %key, "Evicted expired cache entry");
        Ok(None)
    }

    async fn set(
        &self,
        key: Fingerprint,
        answer: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Backend(format!("ttl out of range: {ttl:?}")))?;
        self.entries.insert(key, CacheEntry { answer, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }
}
