//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found an existing container.
    pub hits: u64,
    /// Number of `get` calls that had to create or seed a container.
    pub misses: u64,
    /// Misses satisfied from a backend-provided seed rather than the factory.
    pub seeded: u64,
    /// Number of in-place capacity migrations.
    pub resizes: u64,
    /// Number of `put` calls that replaced an existing container.
    pub overwrites: u64,
    /// Number of containers removed by eviction.
    pub evictions: u64,
    /// Number of containers currently cached.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters backing [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    seeded: AtomicU64,
    resizes: AtomicU64,
    overwrites: AtomicU64,
    evictions: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self, seeded: bool) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if seeded {
            self.seeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_resize(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overwrite(&self) {
        self.overwrites.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            seeded: self.seeded.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            overwrites: self.overwrites.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss(false);
        recorder.record_miss(true);
        recorder.record_resize();
        recorder.record_overwrite();
        recorder.record_evictions(3);

        let stats = recorder.snapshot(7);
        assert_eq!(
            stats,
            CacheStats {
                hits: 2,
                misses: 2,
                seeded: 1,
                resizes: 1,
                overwrites: 1,
                evictions: 3,
                entry_count: 7,
            }
        );
    }
}
