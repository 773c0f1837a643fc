use crate::server::data_items::SAMPLING_SLOTS;
use std::sync::atomic::{AtomicU64, Ordering};

/// One worker's counters for one sampling slot. Increments are Relaxed;
/// the sampling loop may aggregate a slot while stragglers still write to
/// it, which the design accepts (the slot is frozen the instant it stops
/// being current, clearing only ever targets the incoming slot).
#[derive(Default)]
pub struct SlotStats {
    num_txns: AtomicU64,
    cumulative_time_us: AtomicU64,
    num_failed: AtomicU64,
    num_timely: AtomicU64,
}

/// Aggregated view of one slot across all workers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotAggregate {
    pub num_txns: u64,
    pub cumulative_time_ms: f64,
    pub num_failed: u64,
    pub num_timely: u64,
}

impl SlotAggregate {
    pub fn average_delay_ms(&self) -> f64 {
        if self.num_txns > 0 {
            self.cumulative_time_ms / self.num_txns as f64
        } else {
            0.0
        }
    }
}

/// Per-slot, per-worker counter matrix, written concurrently by workers
/// and read by the sampling loop.
pub struct StatsMatrix {
    cells: Vec<Vec<SlotStats>>,
    num_workers: usize,
}

impl StatsMatrix {
    pub fn new(num_workers: usize) -> Self {
        let cells = (0..SAMPLING_SLOTS)
            .map(|_| (0..num_workers).map(|_| SlotStats::default()).collect())
            .collect();
        Self { cells, num_workers }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn record_success(&self, slot: usize, worker: usize, elapsed_us: u64, timely: bool) {
        let cell = &self.cells[slot][worker];
        cell.num_txns.fetch_add(1, Ordering::Relaxed);
        cell.cumulative_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        if timely {
            cell.num_timely.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, slot: usize, worker: usize) {
        self.cells[slot][worker].num_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset every worker's counters for the slot that is about to become
    /// current. Never called on the slot being aggregated.
    pub fn clear_slot(&self, slot: usize) {
        for cell in &self.cells[slot] {
            cell.num_txns.store(0, Ordering::Relaxed);
            cell.cumulative_time_us.store(0, Ordering::Relaxed);
            cell.num_failed.store(0, Ordering::Relaxed);
            cell.num_timely.store(0, Ordering::Relaxed);
        }
    }

    pub fn aggregate(&self, slot: usize) -> SlotAggregate {
        let mut num_txns = 0u64;
        let mut cumulative_time_us = 0u64;
        let mut num_failed = 0u64;
        let mut num_timely = 0u64;

        for cell in &self.cells[slot] {
            num_txns += cell.num_txns.load(Ordering::Relaxed);
            cumulative_time_us += cell.cumulative_time_us.load(Ordering::Relaxed);
            num_failed += cell.num_failed.load(Ordering::Relaxed);
            num_timely += cell.num_timely.load(Ordering::Relaxed);
        }

        SlotAggregate {
            num_txns,
            cumulative_time_ms: cumulative_time_us as f64 / 1000.0,
            num_failed,
            num_timely,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_sums_across_workers() {
        let stats = StatsMatrix::new(2);

        // 10 transactions totalling 500ms in slot 0, split across workers.
        for _ in 0..6 {
            stats.record_success(0, 0, 50_000, true);
        }
        for _ in 0..4 {
            stats.record_success(0, 1, 50_000, true);
        }
        stats.record_failure(0, 1);

        let agg = stats.aggregate(0);
        assert_eq!(agg.num_txns, 10);
        assert_eq!(agg.cumulative_time_ms, 500.0);
        assert_eq!(agg.num_failed, 1);
        assert_eq!(agg.num_timely, 10);
        assert_eq!(agg.average_delay_ms(), 50.0);
    }

    #[test]
    fn test_empty_slot_average_is_zero() {
        let stats = StatsMatrix::new(4);
        let agg = stats.aggregate(3);
        assert_eq!(agg.num_txns, 0);
        assert_eq!(agg.average_delay_ms(), 0.0);
    }

    #[test]
    fn test_clear_slot_is_isolated() {
        let stats = StatsMatrix::new(1);
        stats.record_success(0, 0, 1000, true);
        stats.record_success(1, 0, 2000, false);

        stats.clear_slot(1);

        assert_eq!(stats.aggregate(0).num_txns, 1);
        assert_eq!(stats.aggregate(1).num_txns, 0);
    }
}
