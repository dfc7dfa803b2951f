//! Query statistics for ad-hoc introspection.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the resolution pipeline, one per outcome.
#[derive(Debug, Default)]
pub struct Stats {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    local_hits: AtomicU64,
    forwarded: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_hit(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A query refused before resolution (FORMERR or NOTIMP).
    pub fn record_rejected(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub cache_hits: u64,
    pub local_hits: u64,
    pub forwarded: u64,
    pub failures: u64,
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_local_hit();
        stats.record_forwarded();
        stats.record_failure();
        stats.record_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.queries, 6);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.local_hits, 1);
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.rejected, 1);
    }
}
