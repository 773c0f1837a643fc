//! Admission gate contract: callers block only while the throttle count is
//! positive, completions consume the count toward zero, and shutdown
//! aborts blocked callers.

use quotebench::server::admission::AdmissionController;
use quotebench::server::control::ControlState;
use quotebench::server::types::{RunningMode, ServerError, ShutdownFlag};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn controller(shutdown: &ShutdownFlag) -> (Arc<ControlState>, Arc<AdmissionController>) {
    let control = Arc::new(ControlState::new(RunningMode::Full, 1000.0, 0.6));
    let admission = Arc::new(AdmissionController::new(control.clone(), shutdown.clone()));
    (control, admission)
}

#[test]
fn test_gate_is_transparent_when_not_throttling() {
    let shutdown = ShutdownFlag::new();
    let (_control, admission) = controller(&shutdown);

    let start = Instant::now();
    admission.admit().unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_gate_blocks_until_count_consumed() {
    let shutdown = ShutdownFlag::new();
    let (control, admission) = controller(&shutdown);
    admission.set_throttle(3);

    let gate = admission.clone();
    let waiter = thread::spawn(move || {
        let start = Instant::now();
        gate.admit().unwrap();
        start.elapsed()
    });

    thread::sleep(Duration::from_millis(60));
    admission.txn_completed();
    admission.txn_completed();
    assert_eq!(control.num_to_throttle(), 1);
    thread::sleep(Duration::from_millis(60));
    admission.txn_completed();

    let blocked_for = waiter.join().unwrap();
    assert!(
        blocked_for >= Duration::from_millis(100),
        "gate released after {:?}, before the count reached zero",
        blocked_for
    );
    assert_eq!(control.num_to_throttle(), 0);
}

#[test]
fn test_completions_never_drive_count_negative() {
    let shutdown = ShutdownFlag::new();
    let (control, admission) = controller(&shutdown);

    admission.txn_completed();
    admission.txn_completed();
    assert_eq!(control.num_to_throttle(), 0);
}

#[test]
fn test_many_waiters_all_released() {
    let shutdown = ShutdownFlag::new();
    let (_control, admission) = controller(&shutdown);
    admission.set_throttle(1);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let gate = admission.clone();
            thread::spawn(move || gate.admit())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    admission.txn_completed();

    for waiter in waiters {
        assert!(waiter.join().unwrap().is_ok());
    }
}

#[test]
fn test_blocked_caller_aborts_on_shutdown() {
    let shutdown = ShutdownFlag::new();
    let (_control, admission) = controller(&shutdown);
    admission.set_throttle(100);

    let gate = admission.clone();
    let waiter = thread::spawn(move || gate.admit());

    thread::sleep(Duration::from_millis(30));
    shutdown.request();

    assert!(matches!(waiter.join().unwrap(), Err(ServerError::Aborted)));
}

#[test]
fn test_sampler_reset_to_zero_releases_waiters() {
    let shutdown = ShutdownFlag::new();
    let (_control, admission) = controller(&shutdown);
    admission.set_throttle(50);

    let gate = admission.clone();
    let waiter = thread::spawn(move || gate.admit());

    thread::sleep(Duration::from_millis(30));
    // The next rotation computed no overload and installed zero.
    admission.set_throttle(0);

    assert!(waiter.join().unwrap().is_ok());
}
