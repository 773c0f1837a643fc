use crate::server::control::ControlState;
use crate::server::types::{ServerError, ShutdownFlag};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blocked admissions re-check the shutdown flag at this cadence.
const GATE_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Gate consulted by the request-processing path before a user transaction
/// executes. While the throttle count is positive, callers block on the
/// condvar; each completed transaction consumes one throttle token and
/// wakes the waiters. The original system busy-waited here with yields;
/// the condvar preserves the "delay N future admissions" contract without
/// spinning.
pub struct AdmissionController {
    control: Arc<ControlState>,
    gate: Mutex<()>,
    released: Condvar,
    shutdown: ShutdownFlag,
}

impl AdmissionController {
    pub fn new(control: Arc<ControlState>, shutdown: ShutdownFlag) -> Self {
        Self {
            control,
            gate: Mutex::new(()),
            released: Condvar::new(),
            shutdown,
        }
    }

    /// Block until the throttle count reaches zero. Fails with `Aborted`
    /// if shutdown is observed first. No fairness ordering across waiting
    /// callers is guaranteed.
    pub fn admit(&self) -> Result<(), ServerError> {
        if self.control.num_to_throttle() <= 0 {
            return Ok(());
        }

        let mut guard = self.gate.lock().unwrap();
        while self.control.num_to_throttle() > 0 {
            if self.shutdown.is_requested() {
                return Err(ServerError::Aborted);
            }
            let (g, _timeout) = self.released.wait_timeout(guard, GATE_WAIT_SLICE).unwrap();
            guard = g;
        }
        Ok(())
    }

    /// Consume one throttle token. Called after a user transaction finishes
    /// processing -- throttling is coupled to completion, not entry, which
    /// smooths bursts at the cost of lagging demand by one transaction
    /// latency per token.
    pub fn txn_completed(&self) {
        let prev = self
            .control
            .num_to_throttle
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });

        if prev.is_ok() {
            // Waiters re-check the count; waking on every decrement keeps
            // the gate responsive once the count hits zero.
            let _guard = self.gate.lock().unwrap();
            self.released.notify_all();
        }
    }

    /// Install the throttle count computed by the sampling rotation.
    pub fn set_throttle(&self, count: i64) {
        self.control.num_to_throttle.store(count.max(0), Ordering::Relaxed);
        let _guard = self.gate.lock().unwrap();
        self.released.notify_all();
    }
}
