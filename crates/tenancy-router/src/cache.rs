//! Time-bounded tenant config cache
//!
//! Sits in front of the [`TenantDirectory`]. Staleness is resolved lazily at
//! read time; there is no refresh task. Only successful loads are cached, so a
//! tenant created right after a failed lookup is visible on the next request.
//!
//! Entries are keyed by slug plus an invalidation generation. Invalidating
//! bumps the generation, so a `get` issued afterwards never joins a load that
//! started before it, and that older load lands under a key nobody reads.

use crate::directory::TenantDirectory;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenancy_common::{CacheSettings, TenancyError, TenancyResult, TenantConfig, TenantSlug};

/// A loaded config and when it was fetched
///
/// Replaced wholesale on refresh, never mutated.
#[derive(Debug, Clone)]
pub struct CachedConfigEntry {
    /// Decrypted tenant config
    pub config: Arc<TenantConfig>,
    /// When the directory returned it
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    slug: TenantSlug,
    epoch: u64,
    revision: u64,
}

/// Tenant config cache with TTL and explicit invalidation
pub struct TenantConfigCache {
    entries: Cache<EntryKey, CachedConfigEntry>,
    /// Bumped by `invalidate(None)`
    epoch: AtomicU64,
    /// Bumped per slug by `invalidate(Some(_))`
    revisions: DashMap<TenantSlug, u64>,
    directory: Arc<TenantDirectory>,
    ttl: Duration,
}

impl TenantConfigCache {
    /// Create cache from settings
    pub fn new(directory: Arc<TenantDirectory>, settings: &CacheSettings) -> Self {
        Self::with_ttl(directory, settings.ttl(), settings.max_capacity)
    }

    /// Create cache with explicit TTL and capacity
    pub fn with_ttl(directory: Arc<TenantDirectory>, ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            entries,
            epoch: AtomicU64::new(0),
            revisions: DashMap::new(),
            directory,
            ttl,
        }
    }

    fn key(&self, slug: &TenantSlug) -> EntryKey {
        EntryKey {
            slug: slug.clone(),
            epoch: self.epoch.load(Ordering::Acquire),
            revision: self.revisions.get(slug).map_or(0, |r| *r),
        }
    }

    /// Return the cached config, loading it from the directory when absent or
    /// expired.
    ///
    /// Concurrent misses for the same slug share one directory call. Errors,
    /// including `TenantNotFound`, are returned to every waiter and not cached.
    pub async fn get(&self, slug: &TenantSlug) -> TenancyResult<Arc<TenantConfig>> {
        let load = async {
            tracing::debug!(slug = %slug, "config cache miss");
            let config = self.directory.fetch_by_slug(slug).await?;
            Ok::<_, TenancyError>(CachedConfigEntry {
                config: Arc::new(config),
                fetched_at: Utc::now(),
            })
        };

        self.entries
            .try_get_with(self.key(slug), load)
            .await
            .map(|entry| entry.config)
            .map_err(|e| (*e).clone())
    }

    /// Look at the cached entry without loading
    pub async fn peek(&self, slug: &TenantSlug) -> Option<CachedConfigEntry> {
        self.entries.get(&self.key(slug)).await
    }

    /// Configs currently cached, in no particular order
    pub fn configs(&self) -> Vec<Arc<TenantConfig>> {
        self.entries.iter().map(|(_, entry)| entry.config).collect()
    }

    /// Drop one entry, or everything when `slug` is `None`.
    ///
    /// Once this returns, no `get` observes a config loaded before the call,
    /// including one whose load was still in flight.
    pub async fn invalidate(&self, slug: Option<&TenantSlug>) {
        match slug {
            Some(slug) => {
                let stale = self.key(slug);
                *self.revisions.entry(slug.clone()).or_insert(0) += 1;
                self.entries.invalidate(&stale).await;
                tracing::debug!(slug = %slug, "config cache entry invalidated");
            }
            None => {
                self.epoch.fetch_add(1, Ordering::AcqRel);
                self.entries.invalidate_all();
                tracing::info!("config cache cleared");
            }
        }
    }

    /// Current number of entries
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
