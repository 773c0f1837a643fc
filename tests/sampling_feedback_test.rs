//! Feedback-loop behavior across sampling rotations: adaptive update
//! periods stay inside their bounds, overload smoothing follows the
//! exponential recurrence, and throttling respects the running mode.

use quotebench::server::admission::AdmissionController;
use quotebench::server::control::ControlState;
use quotebench::server::data_items::{DataItemTable, SAMPLING_SLOTS};
use quotebench::server::sampling::SamplingController;
use quotebench::server::stats::StatsMatrix;
use quotebench::server::ticket_queue::TicketQueue;
use quotebench::server::types::{RunningMode, ShutdownFlag, TransactionKind, TxnPayload, TxnRequest};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    control: Arc<ControlState>,
    table: Arc<DataItemTable>,
    stats: Arc<StatsMatrix>,
    user_queue: Arc<TicketQueue>,
    sampler: SamplingController,
}

fn fixture(mode: RunningMode, alpha: f64) -> Fixture {
    let shutdown = ShutdownFlag::new();
    let symbols: Vec<String> = ["AAPL", "MSFT", "GOOG"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let table = Arc::new(DataItemTable::from_symbols(&symbols, 0, 500.0, 2000.0));
    let control = Arc::new(ControlState::new(mode, 1000.0, alpha));
    let stats = Arc::new(StatsMatrix::new(2));
    let user_queue = Arc::new(TicketQueue::new(64, shutdown.clone()));
    let sys_queue = Arc::new(TicketQueue::new(64, shutdown.clone()));
    let admission = Arc::new(AdmissionController::new(control.clone(), shutdown.clone()));
    let sampler = SamplingController::new(
        control.clone(),
        table.clone(),
        stats.clone(),
        user_queue.clone(),
        sys_queue,
        admission,
        shutdown,
        Duration::from_secs(30),
    );
    Fixture {
        control,
        table,
        stats,
        user_queue,
        sampler,
    }
}

fn seed_periods(table: &DataItemTable, period: f64) {
    for item in table.iter() {
        for slot in 0..SAMPLING_SLOTS {
            item.set_period_ms(slot, period);
        }
    }
}

/// Mark every item cold (refreshed but never accessed) in the current slot.
fn mark_cold(fx: &Fixture) {
    let slot = fx.control.current_slot();
    for item in fx.table.iter() {
        item.record_update(slot);
    }
}

/// Mark every item hot (accessed more than refreshed) in the current slot.
fn mark_hot(fx: &Fixture) {
    let slot = fx.control.current_slot();
    for item in fx.table.iter() {
        item.record_update(slot);
        item.record_access(slot);
        item.record_access(slot);
    }
}

#[test]
fn test_cold_trajectory_1000_1100_1210_1331() {
    let fx = fixture(RunningMode::AdaptiveUpdate, 0.6);
    seed_periods(&fx.table, 1000.0);

    for expected in [1100.0, 1210.0, 1331.0] {
        mark_cold(&fx);
        fx.sampler.rotate();
        let slot = fx.control.current_slot();
        for item in fx.table.iter() {
            assert!((item.period_ms(slot) - expected).abs() < 1e-9);
        }
    }
}

#[test]
fn test_cold_item_never_exceeds_max_period() {
    let fx = fixture(RunningMode::Full, 0.6);
    seed_periods(&fx.table, 1000.0);

    for _ in 0..30 {
        mark_cold(&fx);
        fx.sampler.rotate();
        let slot = fx.control.current_slot();
        for item in fx.table.iter() {
            assert!(item.period_ms(slot) <= 2000.0);
        }
    }

    let slot = fx.control.current_slot();
    for item in fx.table.iter() {
        assert_eq!(item.period_ms(slot), 2000.0);
    }
}

#[test]
fn test_hot_item_never_drops_below_min_period() {
    let fx = fixture(RunningMode::Full, 0.6);
    seed_periods(&fx.table, 1000.0);

    for _ in 0..30 {
        mark_hot(&fx);
        fx.sampler.rotate();
        let slot = fx.control.current_slot();
        for item in fx.table.iter() {
            assert!(item.period_ms(slot) >= 500.0);
        }
    }

    let slot = fx.control.current_slot();
    for item in fx.table.iter() {
        assert_eq!(item.period_ms(slot), 500.0);
    }
}

#[test]
fn test_base_mode_pins_period_at_min() {
    let fx = fixture(RunningMode::Base, 0.6);
    seed_periods(&fx.table, 1800.0);

    mark_cold(&fx);
    fx.sampler.rotate();

    let slot = fx.control.current_slot();
    for item in fx.table.iter() {
        assert_eq!(item.period_ms(slot), 500.0);
    }
}

#[test]
fn test_smoothing_0_0_1_with_alpha_04_gives_04() {
    let fx = fixture(RunningMode::Full, 0.4);

    // Raw degrees 0, 0: smoothed stays at 0.
    fx.sampler.rotate();
    assert_eq!(fx.control.smoothed_overload_degree(), 0.0);
    fx.sampler.rotate();
    assert_eq!(fx.control.smoothed_overload_degree(), 0.0);

    // Raw degree 1.0 (average delay at twice the bound).
    let slot = fx.control.current_slot();
    fx.stats.record_success(slot, 0, 2_000_000, false);
    fx.sampler.rotate();

    assert_eq!(fx.control.overload_degree(), 1.0);
    assert!((fx.control.smoothed_overload_degree() - 0.4).abs() < 1e-9);
}

#[test]
fn test_average_delay_50ms_overload_zero() {
    let fx = fixture(RunningMode::Full, 0.4);

    let slot = fx.control.current_slot();
    for _ in 0..10 {
        fx.stats.record_success(slot, 0, 50_000, true);
    }
    fx.sampler.rotate();

    assert_eq!(fx.control.average_service_delay_ms(), 50.0);
    assert_eq!(fx.control.overload_degree(), 0.0);
    assert_eq!(fx.control.num_to_throttle(), 0);
}

#[test]
fn test_base_mode_throttle_always_zero() {
    let fx = fixture(RunningMode::Base, 1.0);

    let slot = fx.control.current_slot();
    fx.stats.record_success(slot, 0, 30_000_000, false);
    for _ in 0..20 {
        fx.user_queue
            .enqueue(TxnRequest::new(TransactionKind::ViewStock, TxnPayload::new(), 0))
            .unwrap();
    }
    fx.sampler.rotate();

    assert!(fx.control.smoothed_overload_degree() > 0.0);
    assert_eq!(fx.control.num_to_throttle(), 0);
}

#[test]
fn test_full_mode_throttles_when_overloaded_and_queued() {
    let fx = fixture(RunningMode::Full, 1.0);

    let slot = fx.control.current_slot();
    fx.stats.record_success(slot, 0, 30_000_000, false);
    for _ in 0..20 {
        fx.user_queue
            .enqueue(TxnRequest::new(TransactionKind::ViewStock, TxnPayload::new(), 0))
            .unwrap();
    }
    fx.sampler.rotate();

    assert!(fx.control.smoothed_overload_degree() > 0.0);
    assert_eq!(fx.control.total_enqueued(), 20);
    // 20 * 29 / 100 = 5.8, truncated to 5.
    assert_eq!(fx.control.num_to_throttle(), 5);
}

#[test]
fn test_full_mode_no_throttle_when_queue_empty() {
    let fx = fixture(RunningMode::Full, 1.0);

    let slot = fx.control.current_slot();
    fx.stats.record_success(slot, 0, 30_000_000, false);
    fx.sampler.rotate();

    assert!(fx.control.smoothed_overload_degree() > 0.0);
    assert_eq!(fx.control.total_enqueued(), 0);
    assert_eq!(fx.control.num_to_throttle(), 0);
}

#[test]
fn test_smoothed_degree_persists_across_rotations() {
    let fx = fixture(RunningMode::Full, 0.5);

    let slot = fx.control.current_slot();
    fx.stats.record_success(slot, 0, 3_000_000, false);
    fx.sampler.rotate();
    // overload 2.0, smoothed 1.0
    assert_eq!(fx.control.smoothed_overload_degree(), 1.0);

    // Idle rotation decays the smoothed degree, it does not reset it.
    fx.sampler.rotate();
    assert_eq!(fx.control.smoothed_overload_degree(), 0.5);
    fx.sampler.rotate();
    assert_eq!(fx.control.smoothed_overload_degree(), 0.25);
}
