//! Resolution cache
//!
//! Caches resident-resolution outcomes, both resolved and not resolvable,
//! keyed by `(handle, kind, accessing organization)`. Every entry is stamped
//! with the hierarchy version it was computed at; a lookup presenting a
//! different version treats the entry as stale and drops it. The TTL covers
//! ownership changes the hierarchy version cannot see.

use orgmgt_core::IdentityKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::OrgMgtConfig;
use crate::resolver::ResidentResolution;

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Identity handle
    pub handle: String,
    /// Identity kind
    pub kind: IdentityKind,
    /// Accessing organization
    pub accessing_org_id: Uuid,
}

impl CacheKey {
    /// Create a cache key.
    pub fn new(handle: impl Into<String>, kind: IdentityKind, accessing_org_id: Uuid) -> Self {
        Self {
            handle: handle.into(),
            kind,
            accessing_org_id,
        }
    }
}

/// Cached resolution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CachedResolution {
    /// The identity resolved to a resident organization
    Resident(ResidentResolution),
    /// No organization on the chain defines the identity
    NotResolvable,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedResolution,
    version: u64,
    inserted_at: Instant,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups with no entry
    pub misses: u64,
    /// Entries dropped on lookup for version mismatch or expiry
    pub stale: u64,
    /// Entries dropped to respect the capacity bound
    pub evictions: u64,
    /// Current number of entries
    pub entries: usize,
}

/// Version-checked resolution cache.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    evictions: AtomicU64,
}

impl ResolutionCache {
    /// Create an enabled cache.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            enabled: true,
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO, 1)
        }
    }

    /// Create a cache from configuration.
    pub fn from_config(config: &OrgMgtConfig) -> Self {
        if config.cache_enabled {
            Self::new(config.cache_ttl(), config.cache_max_entries)
        } else {
            Self::disabled()
        }
    }

    /// Whether the cache stores entries.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up an entry computed at `current_version`.
    pub async fn get(&self, key: &CacheKey, current_version: u64) -> Option<CachedResolution> {
        if !self.enabled {
            return None;
        }

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if self.is_fresh(entry, current_version) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent insert may have refreshed it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if self.is_fresh(entry, current_version) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
            self.stale.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store an outcome computed at `version`.
    pub async fn insert(&self, key: CacheKey, value: CachedResolution, version: u64) {
        if !self.enabled {
            return;
        }

        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let evicted = self.evict(&mut entries, version);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                version,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry. Returns the number removed.
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        if removed > 0 {
            debug!(removed, "Invalidated resolution cache");
        }
        removed
    }

    /// Drop every entry for one identity, across all accessing organizations.
    pub async fn invalidate_identity(&self, handle: &str, kind: IdentityKind) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !(key.kind == kind && key.handle == handle));
        let removed = before - entries.len();
        debug!(handle, kind = %kind, removed, "Invalidated cached resolutions for identity");
        removed
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, current_version: u64) -> bool {
        entry.version == current_version && entry.inserted_at.elapsed() < self.ttl
    }

    /// Drop stale and expired entries first, then the oldest one if still full.
    fn evict(&self, entries: &mut HashMap<CacheKey, CacheEntry>, current_version: u64) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, current_version));

        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        before - entries.len()
    }
}
