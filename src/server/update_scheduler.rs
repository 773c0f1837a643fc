use crate::server::control::ControlState;
use crate::server::data_items::DataItemTable;
use crate::server::ticket_queue::TicketQueue;
use crate::server::types::{ServerError, ShutdownFlag, TxnRequest};
use crate::utils::now_ms;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Fixed tick cadence; running every tick regardless of how many items are
/// due bounds scheduling jitter to one tick.
pub const UPDATE_TICK_MS: u64 = 100;

/// Owns a static partition of the data-item table and keeps its items
/// fresh: on every tick, items whose due time has passed are submitted to
/// the system transaction queue as refresh transactions. The worker that
/// performs the refresh re-arms the item from the post-refresh clock; the
/// provisional re-arm here only prevents resubmitting an in-flight item.
pub struct UpdateScheduler {
    table: Arc<DataItemTable>,
    range: Range<usize>,
    sys_queue: Arc<TicketQueue>,
    control: Arc<ControlState>,
    shutdown: ShutdownFlag,
}

impl UpdateScheduler {
    pub fn new(
        table: Arc<DataItemTable>,
        range: Range<usize>,
        sys_queue: Arc<TicketQueue>,
        control: Arc<ControlState>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            table,
            range,
            sys_queue,
            control,
            shutdown,
        }
    }

    /// Submit refresh transactions for every owned item whose due time has
    /// passed. Returns the number submitted.
    pub fn tick(&self, now: u64) -> Result<usize, ServerError> {
        let slot = self.control.current_slot();
        let mut submitted = 0;

        for index in self.range.clone() {
            let item = match self.table.get(index) {
                Some(item) => item,
                None => break,
            };
            if item.next_due_ms() > now {
                continue;
            }

            let req = TxnRequest::system_refresh(index, item.symbol.clone(), now);
            if self.sys_queue.try_enqueue(req)?.is_none() {
                // System queue saturated; leave the item due and let the
                // next tick retry once the workers catch up.
                continue;
            }

            let period = item.period_ms(slot);
            item.set_next_due_ms(now + period as u64);
            submitted += 1;
        }

        Ok(submitted)
    }

    /// Thread driver: tick at the fixed cadence until shutdown.
    pub fn run(&self) {
        eprintln!(
            "[UPDATER] Refreshing items {}..{} every {}ms",
            self.range.start, self.range.end, UPDATE_TICK_MS
        );

        loop {
            if self.shutdown.is_requested() {
                break;
            }
            match self.tick(now_ms()) {
                Ok(_) => {}
                Err(ServerError::Aborted) => break,
                Err(e) => {
                    eprintln!("[UPDATER] Tick failed: {}", e);
                }
            }
            std::thread::sleep(Duration::from_millis(UPDATE_TICK_MS));
        }

        eprintln!(
            "[UPDATER] Exiting (items {}..{})",
            self.range.start, self.range.end
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::RunningMode;

    fn fixture(capacity: usize) -> (Arc<DataItemTable>, Arc<TicketQueue>, UpdateScheduler) {
        let symbols: Vec<String> = ["AAPL", "MSFT"].iter().map(|s| s.to_string()).collect();
        let table = Arc::new(DataItemTable::from_symbols(&symbols, 1000, 500.0, 2000.0));
        let shutdown = ShutdownFlag::new();
        let sys_queue = Arc::new(TicketQueue::new(capacity, shutdown.clone()));
        let control = Arc::new(ControlState::new(RunningMode::Base, 1000.0, 0.6));
        let scheduler = UpdateScheduler::new(
            table.clone(),
            0..2,
            sys_queue.clone(),
            control,
            shutdown,
        );
        (table, sys_queue, scheduler)
    }

    #[test]
    fn test_tick_skips_items_not_yet_due() {
        let (_table, sys_queue, scheduler) = fixture(8);
        // Items seeded due at 1500; nothing due at t=1400.
        assert_eq!(scheduler.tick(1400).unwrap(), 0);
        assert_eq!(sys_queue.occupied(), 0);
    }

    #[test]
    fn test_tick_submits_due_items_and_rearms() {
        let (table, sys_queue, scheduler) = fixture(8);

        assert_eq!(scheduler.tick(1500).unwrap(), 2);
        assert_eq!(sys_queue.occupied(), 2);

        // Provisional re-arm: due times moved one period ahead of the tick.
        for item in table.iter() {
            assert_eq!(item.next_due_ms(), 2000);
        }

        // The same tick time submits nothing the second time around.
        assert_eq!(scheduler.tick(1500).unwrap(), 0);
    }

    #[test]
    fn test_tick_leaves_items_due_when_queue_full() {
        let (table, sys_queue, scheduler) = fixture(1);

        assert_eq!(scheduler.tick(1500).unwrap(), 1);
        assert_eq!(sys_queue.occupied(), 1);

        // The second item could not be submitted and stays due.
        let still_due = table.iter().filter(|i| i.next_due_ms() <= 1500).count();
        assert_eq!(still_due, 1);
    }
}
