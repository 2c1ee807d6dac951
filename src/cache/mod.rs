//! Distributed cache collaborator
//!
//! The lifecycle core only needs four cache operations, expressed by
//! [`CacheClient`]. Two implementations live here:
//!
//! - **InMemoryCacheClient**: process-local map with lazy expiration
//! - **ScopedCacheClient**: prefixes every key with a namespace so several
//!   owners can share one backing cache without stepping on each other
//!
//! [`AliasExistenceCache`] sits on top of a scoped client and is what the
//! index types actually hold.

mod alias;

pub use alias::{AliasExistenceCache, ALIAS_SCOPE};

use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Key/value cache with optional absolute expiration
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Whether a live (non-expired) entry exists for `key`
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Store `value` under `key`, expiring at `expires_at` when given
    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError>;

    /// Remove one key, returning whether it was present
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`, returning how many were dropped
    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Remove everything this client can see
    async fn remove_all(&self) -> Result<usize, CacheError> {
        self.remove_by_prefix("").await
    }
}

/// Errors reported by a cache backend
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache unavailable")]
    Unavailable,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// Process-local cache
///
/// Expired entries are dropped lazily on lookup.
pub struct InMemoryCacheClient {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCacheClient {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet collected
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for InMemoryCacheClient {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(false),
                Some(entry) if entry.is_live(now) => return Ok(true),
                Some(_) => {}
            }
        }

        self.entries.write().await.remove(key);
        Ok(false)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at,
        };

        let mut entries = self.entries.write().await;
        if entry.is_live(self.clock.now()) {
            entries.insert(key.to_string(), entry);
        } else {
            entries.remove(key);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

impl std::fmt::Debug for InMemoryCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheClient").finish_non_exhaustive()
    }
}

/// Namespaces all keys under `scope:`
#[derive(Clone)]
pub struct ScopedCacheClient {
    inner: Arc<dyn CacheClient>,
    prefix: String,
}

impl ScopedCacheClient {
    pub fn new(inner: Arc<dyn CacheClient>, scope: &str) -> Self {
        Self {
            inner,
            prefix: format!("{}:", scope),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheClient for ScopedCacheClient {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(&self.scoped(key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        self.inner.set(&self.scoped(key), value, expires_at).await
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.remove(&self.scoped(key)).await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        self.inner.remove_by_prefix(&self.scoped(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let clock = clock();
        let cache = InMemoryCacheClient::with_clock(Arc::new(clock.clone()));

        let expires = clock.now() + Duration::hours(1);
        cache.set("a", "a", Some(expires)).await.unwrap();
        assert!(cache.exists("a").await.unwrap());

        clock.advance(Duration::hours(2));
        assert!(!cache.exists("a").await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_already_expired_is_not_stored() {
        let clock = clock();
        let cache = InMemoryCacheClient::with_clock(Arc::new(clock.clone()));

        cache
            .set("old", "old", Some(clock.now() - Duration::minutes(1)))
            .await
            .unwrap();
        assert!(!cache.exists("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_scoped_remove_all_leaves_other_scopes() {
        let inner: Arc<dyn CacheClient> = Arc::new(InMemoryCacheClient::new());
        let aliases = ScopedCacheClient::new(Arc::clone(&inner), "alias");
        let other = ScopedCacheClient::new(Arc::clone(&inner), "other");

        aliases.set("events-2024.01.01", "x", None).await.unwrap();
        aliases.set("events-2024.01.02", "x", None).await.unwrap();
        other.set("events-2024.01.01", "x", None).await.unwrap();

        assert_eq!(aliases.remove_all().await.unwrap(), 2);
        assert!(!aliases.exists("events-2024.01.01").await.unwrap());
        assert!(other.exists("events-2024.01.01").await.unwrap());
        assert!(inner.exists("other:events-2024.01.01").await.unwrap());
    }
}
