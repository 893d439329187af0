//! Statistics counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic operation counters owned by the cache.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub load_success: AtomicU64,
    pub load_exception: AtomicU64,
    pub total_load_time_ms: AtomicU64,
    pub eviction: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit.load(Ordering::Relaxed),
            miss_count: self.miss.load(Ordering::Relaxed),
            load_success_count: self.load_success.load(Ordering::Relaxed),
            load_exception_count: self.load_exception.load(Ordering::Relaxed),
            total_load_time_ms: self.total_load_time_ms.load(Ordering::Relaxed),
            eviction_count: self.eviction.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_success_count: u64,
    pub load_exception_count: u64,
    pub total_load_time_ms: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    /// Total lookups observed by the counters.
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Hits per lookup, 1.0 when no lookups happened.
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            n => self.hit_count as f64 / n as f64,
        }
    }
}

/// [`CacheStats`] plus structural diagnostics gathered under the partition
/// locks.
#[derive(Debug, Clone)]
pub struct ExtendedCacheStats {
    pub stats: CacheStats,
    /// Free-block count per free stack.
    pub free_block_counts: Vec<u64>,
    /// LRU list length of every partition.
    pub lru_list_lengths: Vec<u64>,
    pub size: u64,
    pub block_size: usize,
    pub capacity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = Counters::default();
        counters.hit.fetch_add(3, Ordering::Relaxed);
        counters.miss.fetch_add(1, Ordering::Relaxed);
        counters.eviction.fetch_add(7, Ordering::Relaxed);

        let stats = counters.snapshot();
        assert_eq!(stats.hit_count, 3);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.eviction_count, 7);
        assert_eq!(stats.request_count(), 4);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn hit_rate_with_no_requests_is_one() {
        assert_eq!(CacheStats::default().hit_rate(), 1.0);
    }
}
