//! Plan cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of plan cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from an existing entry.
    pub hits: u64,
    /// Lookups that had to prepare (or wait for) a new entry.
    pub misses: u64,
    /// Prepare calls that succeeded and were stored.
    pub prepares: u64,
    /// Prepare calls that failed or timed out.
    pub prepare_failures: u64,
    /// Prepare calls made while caching was disabled.
    pub bypassed: u64,
    /// Cached handles closed through invalidation or drain.
    pub closes: u64,
}

impl CacheStats {
    /// Get the cache hit ratio (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    prepares: AtomicU64,
    prepare_failures: AtomicU64,
    bypassed: AtomicU64,
    closes: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn prepared(&self) {
        self.prepares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn prepare_failed(&self) {
        self.prepare_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bypassed(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn closed(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
            prepare_failures: self.prepare_failures.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.prepares,
            &self.prepare_failures,
            &self.bypassed,
            &self.closes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
