//! Statistics sink that records increments for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use xdcc_events::{Statistic, StatisticsSink};

/// In-memory [`StatisticsSink`].
#[derive(Debug, Default)]
pub struct MemoryStatistics {
    counters: Mutex<HashMap<Statistic, u64>>,
    active: AtomicUsize,
}

impl MemoryStatistics {
    /// Current value of a counter.
    #[must_use]
    pub fn get(&self, statistic: Statistic) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&statistic)
            .copied()
            .unwrap_or(0)
    }

    /// Last reported number of active sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl StatisticsSink for MemoryStatistics {
    fn increment(&self, statistic: Statistic, amount: u64) {
        *self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(statistic)
            .or_default() += amount;
    }

    fn set_active_sessions(&self, count: usize) {
        self.active.store(count, Ordering::SeqCst);
    }
}
