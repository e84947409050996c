use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters over gate decisions.
pub struct GateStats {
    allowed: AtomicU64,
    blocked: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatsSnapshot {
    pub allowed: u64,
    pub blocked: u64,
    pub dropped: u64,
}

impl GateStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = GateStats::new();
        stats.record_allowed();
        stats.record_allowed();
        stats.record_blocked();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allowed, 2);
        assert_eq!(snapshot.blocked, 1);
        assert_eq!(snapshot.dropped, 1);
    }
}
