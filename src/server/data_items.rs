use std::sync::atomic::{AtomicU64, Ordering};

/// Ring size of the sampling slots; "current slot" vs "previous slot" is
/// what matters, the ring just keeps a short history.
pub const SAMPLING_SLOTS: usize = 5;

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

/// Per-item scheduling state. The worker threads, the update scheduler and
/// the sampling loop all touch these fields from different threads, so
/// every field is atomic; floats are stored as bit patterns.
pub struct DataItem {
    pub index: usize,
    pub symbol: String,

    next_due_ms: AtomicU64,
    update_period_ms: [AtomicU64; SAMPLING_SLOTS],
    access_count: [AtomicU64; SAMPLING_SLOTS],
    update_count: [AtomicU64; SAMPLING_SLOTS],
    access_update_ratio: [AtomicU64; SAMPLING_SLOTS],
}

impl DataItem {
    fn new(index: usize, symbol: String, start_ms: u64, min_period_ms: f64) -> Self {
        let item = Self {
            index,
            symbol,
            next_due_ms: AtomicU64::new(start_ms + min_period_ms as u64),
            update_period_ms: Default::default(),
            access_count: Default::default(),
            update_count: Default::default(),
            access_update_ratio: Default::default(),
        };
        for slot in 0..SAMPLING_SLOTS {
            item.set_period_ms(slot, min_period_ms);
        }
        item
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms.load(Ordering::Relaxed)
    }

    pub fn set_next_due_ms(&self, due_ms: u64) {
        self.next_due_ms.store(due_ms, Ordering::Relaxed);
    }

    pub fn period_ms(&self, slot: usize) -> f64 {
        load_f64(&self.update_period_ms[slot])
    }

    pub fn set_period_ms(&self, slot: usize, period_ms: f64) {
        store_f64(&self.update_period_ms[slot], period_ms);
    }

    pub fn record_access(&self, slot: usize) {
        self.access_count[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self, slot: usize) {
        self.update_count[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn access_count(&self, slot: usize) -> u64 {
        self.access_count[slot].load(Ordering::Relaxed)
    }

    pub fn update_count(&self, slot: usize) -> u64 {
        self.update_count[slot].load(Ordering::Relaxed)
    }

    pub fn ratio(&self, slot: usize) -> f64 {
        load_f64(&self.access_update_ratio[slot])
    }

    pub fn set_ratio(&self, slot: usize, ratio: f64) {
        store_f64(&self.access_update_ratio[slot], ratio);
    }

    /// Reset the counters of the slot that is about to become current.
    /// Only the rotation step may call this, and only for the new slot.
    pub fn clear_slot_counters(&self, slot: usize) {
        self.access_count[slot].store(0, Ordering::Relaxed);
        self.update_count[slot].store(0, Ordering::Relaxed);
    }
}

/// Fixed table of per-item scheduling state, one entry per tracked symbol,
/// populated once at startup from the storage collaborator's key list.
pub struct DataItemTable {
    items: Vec<DataItem>,
    min_period_ms: f64,
    max_period_ms: f64,
}

impl DataItemTable {
    pub fn from_symbols(
        symbols: &[String],
        start_ms: u64,
        min_period_ms: f64,
        max_period_ms: f64,
    ) -> Self {
        let items = symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| DataItem::new(index, symbol.clone(), start_ms, min_period_ms))
            .collect();
        Self {
            items,
            min_period_ms,
            max_period_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataItem> {
        self.items.iter()
    }

    pub fn min_period_ms(&self) -> f64 {
        self.min_period_ms
    }

    pub fn max_period_ms(&self) -> f64 {
        self.max_period_ms
    }
}
