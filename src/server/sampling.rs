use crate::server::admission::AdmissionController;
use crate::server::control::ControlState;
use crate::server::data_items::{DataItemTable, SAMPLING_SLOTS};
use crate::server::stats::StatsMatrix;
use crate::server::ticket_queue::TicketQueue;
use crate::server::types::ShutdownFlag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Substituted for a zero update count before dividing, so an item that
/// was never refreshed in the slot reads as strongly hot.
pub const RATIO_EPSILON: f64 = 0.1;

/// Cold items (ratio < 1) relax their refresh period by this factor.
pub const PERIOD_RELAX_FACTOR: f64 = 1.1;

/// Hot items (ratio > 1) tighten their refresh period by this factor.
pub const PERIOD_TIGHTEN_FACTOR: f64 = 0.9;

/// Periodic feedback loop: rotates the sampling slot, recomputes per-item
/// access/update pressure and adjusts refresh periods (Adaptive Update
/// Period policy), aggregates the finished slot's delay statistics into an
/// overload degree, and derives the admission throttle count.
pub struct SamplingController {
    control: Arc<ControlState>,
    table: Arc<DataItemTable>,
    stats: Arc<StatsMatrix>,
    user_queue: Arc<TicketQueue>,
    sys_queue: Arc<TicketQueue>,
    admission: Arc<AdmissionController>,
    shutdown: ShutdownFlag,
    sampling_period: Duration,
    /// Single-flight guard: firings never overlap.
    rotating: AtomicBool,
}

impl SamplingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: Arc<ControlState>,
        table: Arc<DataItemTable>,
        stats: Arc<StatsMatrix>,
        user_queue: Arc<TicketQueue>,
        sys_queue: Arc<TicketQueue>,
        admission: Arc<AdmissionController>,
        shutdown: ShutdownFlag,
        sampling_period: Duration,
    ) -> Self {
        Self {
            control,
            table,
            stats,
            user_queue,
            sys_queue,
            admission,
            shutdown,
            sampling_period,
            rotating: AtomicBool::new(false),
        }
    }

    /// One sampling rotation. Returns false if another rotation was still
    /// in flight (the firing is skipped, never overlapped).
    pub fn rotate(&self) -> bool {
        if self
            .rotating
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            eprintln!("[SAMPLER] Rotation still in flight, skipping firing");
            return false;
        }

        let previous_slot = self.control.current_slot();
        let new_slot = (previous_slot + 1) % SAMPLING_SLOTS;

        // The incoming slot is cleared before it becomes current; the slot
        // being aggregated below is never touched.
        self.stats.clear_slot(new_slot);

        let mode = self.control.mode();
        let min_period = self.table.min_period_ms();
        let max_period = self.table.max_period_ms();

        for item in self.table.iter() {
            let accesses = item.access_count(previous_slot) as f64;
            let mut updates = item.update_count(previous_slot) as f64;
            if updates == 0.0 {
                updates = RATIO_EPSILON;
            }
            let ratio = accesses / updates;
            item.set_ratio(previous_slot, ratio);

            let previous_period = item.period_ms(previous_slot);
            let new_period = if mode.adaptive_updates_enabled() {
                if ratio < 1.0 {
                    // Cold relative to its refresh rate: relax.
                    (previous_period * PERIOD_RELAX_FACTOR).min(max_period)
                } else if ratio > 1.0 {
                    // Hot: tighten.
                    (previous_period * PERIOD_TIGHTEN_FACTOR).max(min_period)
                } else {
                    previous_period
                }
            } else {
                min_period
            };

            item.set_period_ms(new_slot, new_period);
            item.clear_slot_counters(new_slot);
        }

        self.control.set_current_slot(new_slot);

        let aggregate = self.stats.aggregate(previous_slot);
        let average_delay_ms = aggregate.average_delay_ms();
        self.control.set_average_service_delay_ms(average_delay_ms);

        let bound = self.control.desired_delay_bound_ms();
        let overload = ((average_delay_ms - bound) / bound).max(0.0);
        self.control.set_overload_degree(overload);

        let alpha = self.control.alpha();
        let smoothed = alpha * overload + (1.0 - alpha) * self.control.smoothed_overload_degree();
        self.control.set_smoothed_overload_degree(smoothed);

        let total_enqueued = (self.user_queue.occupied() + self.sys_queue.occupied()) as u64;
        self.control.set_total_enqueued(total_enqueued);

        let num_to_throttle = if mode.admission_enabled() && smoothed > 0.0 {
            (total_enqueued as f64 * smoothed / 100.0) as i64
        } else {
            0
        };
        self.admission.set_throttle(num_to_throttle);

        eprintln!(
            "[SAMPLER] slot {} -> {} | txns: {} failed: {} timely: {} | avg: {:.2}ms overload: {:.4} smoothed: {:.4} | enqueued: {} throttle: {}",
            previous_slot,
            new_slot,
            aggregate.num_txns,
            aggregate.num_failed,
            aggregate.num_timely,
            average_delay_ms,
            overload,
            smoothed,
            total_enqueued,
            num_to_throttle,
        );

        self.rotating.store(false, Ordering::Release);
        true
    }

    /// Thread driver: fire once per sampling period until shutdown. The
    /// wait is sliced so shutdown is observed promptly.
    pub fn run(&self) {
        eprintln!(
            "[SAMPLER] Sampling every {:.1}s (mode: {})",
            self.sampling_period.as_secs_f64(),
            self.control.mode().name()
        );

        let slice = Duration::from_millis(50);
        loop {
            let deadline = Instant::now() + self.sampling_period;
            while Instant::now() < deadline {
                if self.shutdown.is_requested() {
                    eprintln!("[SAMPLER] Exiting");
                    return;
                }
                std::thread::sleep(slice.min(deadline - Instant::now()));
            }
            self.rotate();
        }
    }
}
