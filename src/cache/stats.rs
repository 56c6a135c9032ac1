//! Hit/miss accounting for the response cache.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub evictions: AtomicU64,
    pub revalidation_failures: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let stale_hits = self.stale_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        let served_from_cache = hits + stale_hits;
        let total = served_from_cache + misses;
        let hit_rate = if total > 0 {
            // percent, two decimals
            ((served_from_cache as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            stale_hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            revalidation_failures: self.revalidation_failures.load(Ordering::Relaxed),
            entries,
            hit_rate,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.stale_hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.evictions,
            &self.revalidation_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub revalidation_failures: u64,
    pub entries: usize,
    /// Percentage of lookups answered from a stored value.
    pub hit_rate: f64,
}
