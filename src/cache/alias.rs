//! Alias existence cache
//!
//! Sits in front of alias-existence queries so a hot write path does not ask
//! the search engine about the same bucket alias on every document. Entries
//! expire together with the bucket they describe.
//!
//! A miss never means "absent", only "go and ask". Backend failures are
//! logged and read as a miss, so the cache can be lost at any time without
//! affecting correctness.

use super::{CacheClient, ScopedCacheClient};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Default namespace for alias flags
pub const ALIAS_SCOPE: &str = "alias";

/// Existence flags for aliases, scoped to one logical index
#[derive(Clone)]
pub struct AliasExistenceCache {
    cache: Option<ScopedCacheClient>,
}

impl AliasExistenceCache {
    /// Cache flags in `inner` under the default `alias` scope
    pub fn new(inner: Arc<dyn CacheClient>) -> Self {
        Self::with_scope(inner, ALIAS_SCOPE)
    }

    pub fn with_scope(inner: Arc<dyn CacheClient>, scope: &str) -> Self {
        Self {
            cache: Some(ScopedCacheClient::new(inner, scope)),
        }
    }

    /// A cache that never remembers anything
    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Whether `alias` is known to exist
    pub async fn exists(&self, alias: &str) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };

        match cache.exists(alias).await {
            Ok(found) => {
                tracing::trace!(alias, found, "Alias cache lookup");
                found
            }
            Err(e) => {
                tracing::warn!(alias, error = %e, "Alias cache lookup failed, treating as miss");
                false
            }
        }
    }

    /// Record that `alias` exists until `expires_at` (forever when `None`)
    pub async fn remember(&self, alias: &str, expires_at: Option<DateTime<Utc>>) {
        let Some(cache) = &self.cache else {
            return;
        };

        if let Err(e) = cache.set(alias, alias, expires_at).await {
            tracing::warn!(alias, error = %e, "Failed to cache alias existence");
        }
    }

    pub async fn forget(&self, alias: &str) {
        let Some(cache) = &self.cache else {
            return;
        };

        if let Err(e) = cache.remove(alias).await {
            tracing::warn!(alias, error = %e, "Failed to evict alias from cache");
        }
    }

    pub async fn forget_all(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        match cache.remove_all().await {
            Ok(removed) => tracing::debug!(removed, "Cleared alias cache"),
            Err(e) => tracing::warn!(error = %e, "Failed to clear alias cache"),
        }
    }
}

impl std::fmt::Debug for AliasExistenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasExistenceCache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
