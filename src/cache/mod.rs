//! C1's process-wide cache accountant: tracks how many bytes of page images
//! are resident, hands out read-generation epochs, and tells the page-in loop
//! (and the eviction gate) whether the cache is under pressure.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::debug;

/// Sentinel meaning "never assigned a generation" — a freshly materialized
/// page that hasn't yet been touched by a page-in post-check.
pub const READGEN_NOTSET: u64 = 0;
/// Sentinel meaning "evict me first" — strictly less than any epoch a normal
/// touch would assign, but distinct from `READGEN_NOTSET` so a not-yet-touched
/// page isn't confused with one flagged for early eviction.
pub const READGEN_OLDEST: u64 = 1;

const FIRST_EPOCH: u64 = 2;

#[derive(Default, Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub page_read_blocked: u64,
    pub page_locked_blocked: u64,
    pub page_busy_blocked: u64,
    pub page_forcible_evict_blocked: u64,
    pub page_sleep: u64,
    pub bloom_hit: u64,
    pub bloom_miss: u64,
    pub bloom_false_positive: u64,
    pub lsm_lookup_no_bloom: u64,
    pub lsm_checkpoint_throttle: u64,
    pub lsm_merge_throttle: u64,
}

/// Ambient counters for the page cache and the LSM cursor, mirroring the
/// connection-wide statistics the engine this crate is modeled on keeps for
/// cache and LSM internals.
#[derive(Default)]
pub struct Stats {
    pub page_read_blocked: AtomicU64,
    pub page_locked_blocked: AtomicU64,
    pub page_busy_blocked: AtomicU64,
    pub page_forcible_evict_blocked: AtomicU64,
    pub page_sleep: AtomicU64,
    /// a Bloom filter said "maybe present" and the child chunk confirmed it.
    pub bloom_hit: AtomicU64,
    /// a Bloom filter said "definitely absent"; the child chunk was never touched.
    pub bloom_miss: AtomicU64,
    /// a Bloom filter said "maybe present" but the child chunk didn't have the key.
    pub bloom_false_positive: AtomicU64,
    /// a chunk was probed for a point lookup with no Bloom filter attached yet.
    pub lsm_lookup_no_bloom: AtomicU64,
    /// a writer was throttled because the primary chunk needs checkpointing.
    pub lsm_checkpoint_throttle: AtomicU64,
    /// a writer was throttled because too many chunks are awaiting merge.
    pub lsm_merge_throttle: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_read_blocked: self.page_read_blocked.load(Ordering::Relaxed),
            page_locked_blocked: self.page_locked_blocked.load(Ordering::Relaxed),
            page_busy_blocked: self.page_busy_blocked.load(Ordering::Relaxed),
            page_forcible_evict_blocked: self
                .page_forcible_evict_blocked
                .load(Ordering::Relaxed),
            page_sleep: self.page_sleep.load(Ordering::Relaxed),
            bloom_hit: self.bloom_hit.load(Ordering::Relaxed),
            bloom_miss: self.bloom_miss.load(Ordering::Relaxed),
            bloom_false_positive: self.bloom_false_positive.load(Ordering::Relaxed),
            lsm_lookup_no_bloom: self.lsm_lookup_no_bloom.load(Ordering::Relaxed),
            lsm_checkpoint_throttle: self.lsm_checkpoint_throttle.load(Ordering::Relaxed),
            lsm_merge_throttle: self.lsm_merge_throttle.load(Ordering::Relaxed),
        }
    }

    pub fn add_sleep(&self, us: u64) {
        self.page_sleep.fetch_add(us, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSnapshot {
    pub bytes_inmem: u64,
    pub pages_inmem: usize,
    pub epoch: u64,
}

/// Passed by reference (usually inside an `Arc`) to every page-cache
/// operation; owns no pages itself, just the bookkeeping atomics.
pub struct CacheAccountant {
    bytes_inmem: AtomicU64,
    pages_inmem: AtomicUsize,
    next_epoch: AtomicU64,
    cache_size_bytes: u64,
    pressure_threshold: f64,
    pub stats: Stats,
}

impl CacheAccountant {
    pub fn new(cache_size_bytes: u64) -> Self {
        Self {
            bytes_inmem: AtomicU64::new(0),
            pages_inmem: AtomicUsize::new(0),
            next_epoch: AtomicU64::new(FIRST_EPOCH),
            cache_size_bytes,
            pressure_threshold: 0.95,
            stats: Stats::default(),
        }
    }

    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold;
        self
    }

    pub fn account_alloc(&self, size_bytes: usize) {
        self.bytes_inmem.fetch_add(size_bytes as u64, Ordering::Relaxed);
        self.pages_inmem.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_free(&self, size_bytes: usize) {
        self.bytes_inmem.fetch_sub(size_bytes as u64, Ordering::Relaxed);
        self.pages_inmem.fetch_sub(1, Ordering::Relaxed);
    }

    /// The current epoch, used by the page-in loop to decide whether a
    /// page's read generation is already fresh enough to skip a bump.
    pub fn current_epoch(&self) -> u64 {
        self.next_epoch.load(Ordering::Relaxed)
    }

    /// Hand out a fresh epoch and advance the counter.
    pub fn fresh_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    pub fn bytes_inmem(&self) -> u64 {
        self.bytes_inmem.load(Ordering::Relaxed)
    }

    /// True once resident bytes cross the configured pressure threshold;
    /// the page-in loop and forced-eviction gate both consult this before
    /// materializing or keeping more pages resident.
    pub fn is_under_pressure(&self) -> bool {
        let used = self.bytes_inmem() as f64;
        let cap = self.cache_size_bytes as f64 * self.pressure_threshold;
        let under = used >= cap;
        if under {
            debug!(
                "cache pressure: {} bytes resident, threshold {}",
                self.bytes_inmem(),
                cap as u64
            );
        }
        under
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            bytes_inmem: self.bytes_inmem(),
            pages_inmem: self.pages_inmem.load(Ordering::Relaxed),
            epoch: self.current_epoch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_are_monotonic_and_above_sentinels() {
        let cache = CacheAccountant::new(1024);
        let e1 = cache.fresh_epoch();
        let e2 = cache.fresh_epoch();
        assert!(e1 > READGEN_OLDEST);
        assert!(e1 > READGEN_NOTSET);
        assert!(e2 > e1);
    }

    #[test]
    fn pressure_threshold_trips_at_95_percent() {
        let cache = CacheAccountant::new(1000);
        cache.account_alloc(940);
        assert!(!cache.is_under_pressure());
        cache.account_alloc(20);
        assert!(cache.is_under_pressure());
    }

    #[test]
    fn free_reverses_alloc_accounting() {
        let cache = CacheAccountant::new(1000);
        cache.account_alloc(500);
        assert_eq!(cache.snapshot().pages_inmem, 1);
        cache.account_free(500);
        assert_eq!(cache.snapshot().pages_inmem, 0);
        assert_eq!(cache.snapshot().bytes_inmem, 0);
    }
}
