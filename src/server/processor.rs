use crate::server::admission::AdmissionController;
use crate::server::control::ControlState;
use crate::server::data_items::DataItemTable;
use crate::server::stats::StatsMatrix;
use crate::server::ticket_queue::TicketQueue;
use crate::server::trace::{TraceHandle, TraceRecord};
use crate::server::types::{
    ServerError, ShutdownFlag, TransactionKind, TxnRequest, RC_ABORTED, RC_FAILED, RC_OK,
};
use crate::store::QuoteStore;
use crate::utils::now_ms;
use std::sync::Arc;
use std::time::Instant;

/// Dequeues transactions and executes them against the storage
/// collaborator, recording latency and outcome into the stats matrix.
/// One instance per worker thread; user workers additionally pass the
/// admission gate and consume throttle tokens on completion.
pub struct RequestProcessor {
    worker_id: usize,
    queue: Arc<TicketQueue>,
    store: Arc<dyn QuoteStore>,
    table: Arc<DataItemTable>,
    stats: Arc<StatsMatrix>,
    control: Arc<ControlState>,
    admission: Arc<AdmissionController>,
    trace: Option<TraceHandle>,
    shutdown: ShutdownFlag,
}

impl RequestProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        queue: Arc<TicketQueue>,
        store: Arc<dyn QuoteStore>,
        table: Arc<DataItemTable>,
        stats: Arc<StatsMatrix>,
        control: Arc<ControlState>,
        admission: Arc<AdmissionController>,
        trace: Option<TraceHandle>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            worker_id,
            queue,
            store,
            table,
            stats,
            control,
            admission,
            trace,
            shutdown,
        }
    }

    /// Thread driver: dequeue and process until shutdown aborts a wait.
    pub fn run(&self) {
        loop {
            let req = match self.queue.dequeue() {
                Ok(req) => req,
                Err(ServerError::Aborted) => break,
                Err(e) => {
                    eprintln!("[WORKER {}] Dequeue failed: {}", self.worker_id, e);
                    break;
                }
            };

            if let Err(ServerError::Aborted) = self.process(req) {
                break;
            }
        }
        eprintln!("[WORKER {}] Exiting", self.worker_id);
    }

    /// Execute one transaction. `Aborted` means shutdown interrupted the
    /// admission gate and the worker should exit; storage failures are
    /// recorded and reported through the completion slot, never returned.
    pub fn process(&self, req: TxnRequest) -> Result<(), ServerError> {
        if req.kind.is_user() && self.control.mode().admission_enabled() {
            if let Err(ServerError::Aborted) = self.admission.admit() {
                req.completion.finish(RC_ABORTED);
                return Err(ServerError::Aborted);
            }
        }

        let begin = Instant::now();
        let outcome = self.execute(&req);
        let elapsed = begin.elapsed();

        let slot = self.control.current_slot();
        let rc = match outcome {
            Ok(()) => {
                let timely = elapsed.as_secs_f64() * 1000.0 <= self.control.desired_delay_bound_ms();
                self.stats
                    .record_success(slot, self.worker_id, elapsed.as_micros() as u64, timely);
                RC_OK
            }
            Err(e) => {
                self.stats.record_failure(slot, self.worker_id);
                eprintln!(
                    "[WORKER {}] {} txn {} failed: {}",
                    self.worker_id,
                    req.kind.name(),
                    req.ticket,
                    e
                );
                RC_FAILED
            }
        };

        if req.kind.is_user() && self.control.mode().admission_enabled() {
            self.admission.txn_completed();
        }

        req.completion.finish(rc);

        if let Some(trace) = &self.trace {
            trace.push(TraceRecord {
                ts_ms: now_ms(),
                ticket: req.ticket,
                kind: req.kind.name(),
                latency_us: elapsed.as_micros() as u64,
                rc,
            });
        }

        Ok(())
    }

    fn execute(&self, req: &TxnRequest) -> Result<(), ServerError> {
        match req.kind {
            TransactionKind::ViewStock => {
                let slot = self.control.current_slot();
                for item in &req.items {
                    self.store.read_quote(&item.symbol)?;
                    if let Some(entry) = self.table.get(item.symbol_id) {
                        entry.record_access(slot);
                    }
                }
            }
            TransactionKind::ViewPortfolio => {
                for item in &req.items {
                    self.store.view_portfolio(&item.account_id)?;
                }
            }
            TransactionKind::Purchase => {
                let slot = self.control.current_slot();
                for item in &req.items {
                    self.store
                        .purchase(&item.account_id, &item.symbol, item.price, item.quantity)?;
                    if let Some(entry) = self.table.get(item.symbol_id) {
                        entry.record_access(slot);
                    }
                }
            }
            TransactionKind::Sale => {
                let slot = self.control.current_slot();
                for item in &req.items {
                    self.store
                        .sale(&item.account_id, &item.symbol, item.price, item.quantity)?;
                    if let Some(entry) = self.table.get(item.symbol_id) {
                        entry.record_access(slot);
                    }
                }
            }
            TransactionKind::SystemRefresh => {
                // A refresh descriptor carries exactly one item reference;
                // anything else means the enqueueing protocol desynced.
                debug_assert_eq!(req.items.len(), 1);
                for item in &req.items {
                    self.store.refresh_quote(&item.symbol)?;
                    if let Some(entry) = self.table.get(item.symbol_id) {
                        let slot = self.control.current_slot();
                        entry.record_update(slot);
                        // Re-arm from the post-refresh clock with the
                        // slot's current adaptive period.
                        entry.set_next_due_ms(now_ms() + entry.period_ms(slot) as u64);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::{ItemRef, RunningMode, TxnPayload};
    use crate::store::MemoryStore;

    fn fixture() -> (Arc<MemoryStore>, Arc<DataItemTable>, Arc<ControlState>, Arc<StatsMatrix>, RequestProcessor) {
        let shutdown = ShutdownFlag::new();
        let store = Arc::new(MemoryStore::new(&["AAPL", "MSFT"], 2));
        let symbols = store.list_symbols();
        let table = Arc::new(DataItemTable::from_symbols(&symbols, 0, 500.0, 2000.0));
        let control = Arc::new(ControlState::new(RunningMode::Base, 1000.0, 0.6));
        let stats = Arc::new(StatsMatrix::new(1));
        let queue = Arc::new(TicketQueue::new(4, shutdown.clone()));
        let admission = Arc::new(AdmissionController::new(control.clone(), shutdown.clone()));
        let processor = RequestProcessor::new(
            0,
            queue,
            store.clone(),
            table.clone(),
            stats.clone(),
            control.clone(),
            admission,
            None,
            shutdown,
        );
        (store, table, control, stats, processor)
    }

    #[test]
    fn test_view_stock_records_access_and_stats() {
        let (_store, table, control, stats, processor) = fixture();

        let mut items = TxnPayload::new();
        items.push(ItemRef::view_stock(0, "AAPL"));
        items.push(ItemRef::view_stock(1, "MSFT"));
        let req = TxnRequest::new(TransactionKind::ViewStock, items, now_ms());
        let completion = req.completion.clone();

        processor.process(req).unwrap();

        assert_eq!(completion.result_code(), RC_OK);
        let slot = control.current_slot();
        assert_eq!(table.get(0).unwrap().access_count(slot), 1);
        assert_eq!(table.get(1).unwrap().access_count(slot), 1);
        assert_eq!(stats.aggregate(slot).num_txns, 1);
    }

    #[test]
    fn test_unknown_symbol_is_recorded_failure() {
        let (_store, _table, control, stats, processor) = fixture();

        let mut items = TxnPayload::new();
        items.push(ItemRef::view_stock(usize::MAX, "ZZZZ"));
        let req = TxnRequest::new(TransactionKind::ViewStock, items, now_ms());
        let completion = req.completion.clone();

        // A storage failure is not a processing error.
        processor.process(req).unwrap();

        assert_eq!(completion.result_code(), RC_FAILED);
        assert_eq!(stats.aggregate(control.current_slot()).num_failed, 1);
    }

    #[test]
    fn test_system_refresh_updates_item_schedule() {
        let (store, table, control, _stats, processor) = fixture();
        let before = store.read_quote("AAPL").unwrap();

        let req = TxnRequest::system_refresh(0, "AAPL", now_ms());
        processor.process(req).unwrap();

        let after = store.read_quote("AAPL").unwrap();
        assert!(after.updated_ms >= before.updated_ms);

        let slot = control.current_slot();
        let item = table.get(0).unwrap();
        assert_eq!(item.update_count(slot), 1);
        assert!(item.next_due_ms() >= now_ms());
    }

    #[test]
    fn test_purchase_executes_against_store() {
        let (store, _table, _control, _stats, processor) = fixture();
        let account = store.account_ids().remove(0);

        let mut items = TxnPayload::new();
        items.push(ItemRef::trade(account.clone(), 0, "AAPL", 100.0, 5));
        let req = TxnRequest::new(TransactionKind::Purchase, items, now_ms());
        let completion = req.completion.clone();

        processor.process(req).unwrap();

        assert_eq!(completion.result_code(), RC_OK);
        let portfolio = store.view_portfolio(&account).unwrap();
        assert_eq!(portfolio.positions["AAPL"], 5);
    }
}
