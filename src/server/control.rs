use crate::server::data_items::SAMPLING_SLOTS;
use crate::server::types::RunningMode;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

/// Process-wide control state. The sampling loop is the single writer of
/// every mutable field except `num_to_throttle`, which the request
/// processors decrement as throttled admissions are consumed; readers see
/// whole values, never torn updates.
pub struct ControlState {
    mode: RunningMode,
    desired_delay_bound_ms: f64,
    alpha: f64,

    current_slot: AtomicUsize,
    average_service_delay_ms: AtomicU64,
    overload_degree: AtomicU64,
    smoothed_overload_degree: AtomicU64,
    total_enqueued: AtomicU64,
    pub(crate) num_to_throttle: AtomicI64,
}

impl ControlState {
    pub fn new(mode: RunningMode, desired_delay_bound_ms: f64, alpha: f64) -> Self {
        Self {
            mode,
            desired_delay_bound_ms,
            alpha,
            current_slot: AtomicUsize::new(0),
            average_service_delay_ms: AtomicU64::new(0f64.to_bits()),
            overload_degree: AtomicU64::new(0f64.to_bits()),
            smoothed_overload_degree: AtomicU64::new(0f64.to_bits()),
            total_enqueued: AtomicU64::new(0),
            num_to_throttle: AtomicI64::new(0),
        }
    }

    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    pub fn desired_delay_bound_ms(&self) -> f64 {
        self.desired_delay_bound_ms
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot.load(Ordering::Relaxed)
    }

    /// Publish the new current slot; only the rotation step calls this.
    pub fn set_current_slot(&self, slot: usize) {
        debug_assert!(slot < SAMPLING_SLOTS);
        self.current_slot.store(slot, Ordering::Relaxed);
    }

    pub fn average_service_delay_ms(&self) -> f64 {
        load_f64(&self.average_service_delay_ms)
    }

    pub fn set_average_service_delay_ms(&self, v: f64) {
        store_f64(&self.average_service_delay_ms, v);
    }

    pub fn overload_degree(&self) -> f64 {
        load_f64(&self.overload_degree)
    }

    pub fn set_overload_degree(&self, v: f64) {
        store_f64(&self.overload_degree, v);
    }

    pub fn smoothed_overload_degree(&self) -> f64 {
        load_f64(&self.smoothed_overload_degree)
    }

    pub fn set_smoothed_overload_degree(&self, v: f64) {
        store_f64(&self.smoothed_overload_degree, v);
    }

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    pub fn set_total_enqueued(&self, v: u64) {
        self.total_enqueued.store(v, Ordering::Relaxed);
    }

    /// Count of upcoming admissions to delay; zero outside admission-control
    /// modes and consumed toward zero between sampling rotations.
    pub fn num_to_throttle(&self) -> i64 {
        self.num_to_throttle.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_fields_round_trip() {
        let control = ControlState::new(RunningMode::Full, 1000.0, 0.4);
        control.set_smoothed_overload_degree(0.4);
        control.set_average_service_delay_ms(50.0);
        assert_eq!(control.smoothed_overload_degree(), 0.4);
        assert_eq!(control.average_service_delay_ms(), 50.0);
        assert_eq!(control.overload_degree(), 0.0);
    }

    #[test]
    fn test_slot_rotation_bounds() {
        let control = ControlState::new(RunningMode::Base, 1000.0, 0.4);
        assert_eq!(control.current_slot(), 0);
        control.set_current_slot(SAMPLING_SLOTS - 1);
        assert_eq!(control.current_slot(), SAMPLING_SLOTS - 1);
    }
}
