use crate::server::types::{ServerError, ShutdownFlag, TxnRequest};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded waits are sliced so a blocked producer/consumer re-checks the
/// shutdown flag every slice.
const WAIT_SLICE: Duration = Duration::from_secs(2);

struct QueueState {
    slots: Vec<Option<TxnRequest>>,
    occupied: usize,
    next_in: usize,
    next_out: usize,
    /// Last ticket handed out; monotonically non-decreasing, assigned
    /// exactly once per successful enqueue.
    ticket_req: u64,
}

/// Bounded circular buffer of pending transactions shared by producers and
/// consumers. Enqueue order, dequeue order, and ticket order all agree.
///
/// Two independent instances exist in the deployed server: one for user
/// transactions and one for system refresh transactions, with disjoint
/// capacity pools and identical semantics.
pub struct TicketQueue {
    state: Mutex<QueueState>,
    /// Signaled when an item is enqueued.
    more: Condvar,
    /// Signaled when a slot frees up.
    less: Condvar,
    capacity: usize,
    shutdown: ShutdownFlag,
}

impl TicketQueue {
    pub fn new(capacity: usize, shutdown: ShutdownFlag) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            state: Mutex::new(QueueState {
                slots: (0..capacity).map(|_| None).collect(),
                occupied: 0,
                next_in: 0,
                next_out: 0,
                ticket_req: 0,
            }),
            more: Condvar::new(),
            less: Condvar::new(),
            capacity,
            shutdown,
        }
    }

    /// Enqueue a transaction, blocking while the queue is full. Returns the
    /// assigned ticket, or `Aborted` if shutdown is observed while waiting.
    pub fn enqueue(&self, mut req: TxnRequest) -> Result<u64, ServerError> {
        let mut state = self.state.lock().unwrap();

        while state.occupied >= self.capacity {
            if self.shutdown.is_requested() {
                return Err(ServerError::Aborted);
            }
            let (guard, _timeout) = self.less.wait_timeout(state, WAIT_SLICE).unwrap();
            state = guard;
        }
        debug_assert!(state.occupied < self.capacity);

        state.ticket_req += 1;
        let ticket = state.ticket_req;
        req.ticket = ticket;

        let slot = state.next_in;
        state.slots[slot] = Some(req);
        state.next_in = (state.next_in + 1) % self.capacity;
        state.occupied += 1;
        // now: either occupied < capacity and next_in is the next empty
        // slot, or occupied == capacity and next_in == next_out.

        self.more.notify_one();
        Ok(ticket)
    }

    /// Dequeue the oldest transaction, blocking while the queue is empty.
    /// Fails with `Aborted` if shutdown is observed while waiting.
    pub fn dequeue(&self) -> Result<TxnRequest, ServerError> {
        let mut state = self.state.lock().unwrap();

        while state.occupied == 0 {
            if self.shutdown.is_requested() {
                return Err(ServerError::Aborted);
            }
            let (guard, _timeout) = self.more.wait_timeout(state, WAIT_SLICE).unwrap();
            state = guard;
        }
        debug_assert!(state.occupied > 0);

        let slot = state.next_out;
        let req = state.slots[slot].take().expect("occupied slot holds a request");
        state.next_out = (state.next_out + 1) % self.capacity;
        state.occupied -= 1;
        // now: either occupied > 0 and next_out is the next occupied slot,
        // or occupied == 0 and next_out == next_in.

        self.less.notify_one();
        Ok(req)
    }

    /// Non-blocking enqueue used where the caller prefers to skip a cycle
    /// over waiting (the update scheduler under a saturated system queue).
    pub fn try_enqueue(&self, mut req: TxnRequest) -> Result<Option<u64>, ServerError> {
        if self.shutdown.is_requested() {
            return Err(ServerError::Aborted);
        }

        let mut state = self.state.lock().unwrap();
        if state.occupied >= self.capacity {
            return Ok(None);
        }

        state.ticket_req += 1;
        let ticket = state.ticket_req;
        req.ticket = ticket;

        let slot = state.next_in;
        state.slots[slot] = Some(req);
        state.next_in = (state.next_in + 1) % self.capacity;
        state.occupied += 1;

        self.more.notify_one();
        Ok(Some(ticket))
    }

    /// Current queue depth; consumed by the sampling loop.
    pub fn occupied(&self) -> usize {
        self.state.lock().unwrap().occupied
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last ticket assigned by this queue.
    pub fn last_ticket(&self) -> u64 {
        self.state.lock().unwrap().ticket_req
    }
}
