pub mod admission;
pub mod control;
pub mod data_items;
pub mod pinning;
pub mod processor;
pub mod sampling;
pub mod stats;
pub mod ticket_queue;
pub mod trace;
pub mod types;
pub mod update_scheduler;

use crate::config::ServerConfig;
use crate::server::admission::AdmissionController;
use crate::server::control::ControlState;
use crate::server::data_items::DataItemTable;
use crate::server::processor::RequestProcessor;
use crate::server::sampling::SamplingController;
use crate::server::stats::StatsMatrix;
use crate::server::ticket_queue::TicketQueue;
use crate::server::trace::{spawn_trace_writer, TraceHandle};
use crate::server::types::{
    ServerError, ShutdownFlag, TransactionKind, TxnCompletion, TxnPayload, TxnRequest,
};
use crate::server::update_scheduler::UpdateScheduler;
use crate::store::QuoteStore;
use crate::utils::{now_ms, partition_ranges};
use crate::DynError;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A submitted transaction: ticket plus the shared completion slot.
pub struct PendingTxn {
    pub ticket: u64,
    completion: Arc<TxnCompletion>,
}

impl PendingTxn {
    /// Poll for completion; None on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<i32> {
        self.completion.wait(timeout)
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn result_code(&self) -> i32 {
        self.completion.result_code()
    }
}

/// Cloneable handle for submitting user transactions to the server.
#[derive(Clone)]
pub struct ServerHandle {
    user_queue: Arc<TicketQueue>,
    shutdown: ShutdownFlag,
}

impl ServerHandle {
    /// Enqueue a user transaction, blocking while the queue is full.
    pub fn submit(
        &self,
        kind: TransactionKind,
        items: TxnPayload,
    ) -> Result<PendingTxn, ServerError> {
        debug_assert!(kind.is_user(), "system transactions are not submitted here");
        let req = TxnRequest::new(kind, items, now_ms());
        let completion = req.completion.clone();
        let ticket = self.user_queue.enqueue(req)?;
        Ok(PendingTxn { ticket, completion })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_requested()
    }
}

/// End-of-run summary, serialized on shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub mode: String,
    pub user_tickets_issued: u64,
    pub sys_tickets_issued: u64,
    pub average_service_delay_ms: f64,
    pub smoothed_overload_degree: f64,
    pub trace_records_dropped: u64,
}

/// The transaction server: two ticket queues, the data-item table, the
/// worker pool, the update schedulers, and the sampling loop, wired
/// together with one shutdown flag.
pub struct Server {
    config: ServerConfig,
    control: Arc<ControlState>,
    table: Arc<DataItemTable>,
    stats: Arc<StatsMatrix>,
    user_queue: Arc<TicketQueue>,
    sys_queue: Arc<TicketQueue>,
    admission: Arc<AdmissionController>,
    trace: Option<TraceHandle>,
    shutdown: ShutdownFlag,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Build and start the server: populate the data-item table from the
    /// store's key list, then spawn workers, update schedulers, the
    /// sampling thread, and (if configured) the trace writer.
    pub fn start(config: ServerConfig, store: Arc<dyn QuoteStore>) -> Result<Self, DynError> {
        let shutdown = ShutdownFlag::new();
        let start_ms = now_ms();

        let symbols = store.list_symbols();
        if symbols.is_empty() {
            return Err("store reported no symbols to track".into());
        }

        let table = Arc::new(DataItemTable::from_symbols(
            &symbols,
            start_ms,
            config.min_update_period_ms(),
            config.max_update_period_ms(),
        ));

        let user_queue = Arc::new(TicketQueue::new(config.user_queue_capacity, shutdown.clone()));
        let sys_queue = Arc::new(TicketQueue::new(config.sys_queue_capacity, shutdown.clone()));

        let num_workers = config.num_workers + config.num_sys_workers;
        let stats = Arc::new(StatsMatrix::new(num_workers));
        let control = Arc::new(ControlState::new(
            config.mode,
            config.desired_delay_bound_ms,
            config.alpha,
        ));
        let admission = Arc::new(AdmissionController::new(control.clone(), shutdown.clone()));

        let trace = match &config.trace_file {
            Some(path) => Some(spawn_trace_writer(path, shutdown.clone())?),
            None => None,
        };
        let (trace_handle, trace_join) = match trace {
            Some((handle, join)) => (Some(handle), Some(join)),
            None => (None, None),
        };

        eprintln!(
            "[SERVER] Starting: mode={} items={} workers={}+{} updaters={} user_cap={} sys_cap={}",
            config.mode.name(),
            table.len(),
            config.num_workers,
            config.num_sys_workers,
            config.num_update_threads,
            config.user_queue_capacity,
            config.sys_queue_capacity,
        );

        let mut threads = Vec::new();

        // User transaction workers.
        for worker_id in 0..config.num_workers {
            let processor = RequestProcessor::new(
                worker_id,
                user_queue.clone(),
                store.clone(),
                table.clone(),
                stats.clone(),
                control.clone(),
                admission.clone(),
                trace_handle.clone(),
                shutdown.clone(),
            );
            threads.push(spawn_worker(
                format!("worker-{}", worker_id),
                config.pin_threads,
                worker_id,
                move || processor.run(),
            )?);
        }

        // System refresh workers.
        for i in 0..config.num_sys_workers {
            let worker_id = config.num_workers + i;
            let processor = RequestProcessor::new(
                worker_id,
                sys_queue.clone(),
                store.clone(),
                table.clone(),
                stats.clone(),
                control.clone(),
                admission.clone(),
                trace_handle.clone(),
                shutdown.clone(),
            );
            threads.push(spawn_worker(
                format!("sys-worker-{}", i),
                config.pin_threads,
                worker_id,
                move || processor.run(),
            )?);
        }

        // Update schedulers, each owning a static partition of the table.
        for (i, range) in partition_ranges(table.len(), config.num_update_threads)
            .into_iter()
            .enumerate()
        {
            let scheduler = UpdateScheduler::new(
                table.clone(),
                range,
                sys_queue.clone(),
                control.clone(),
                shutdown.clone(),
            );
            threads.push(spawn_worker(
                format!("updater-{}", i),
                false,
                0,
                move || scheduler.run(),
            )?);
        }

        // Sampling loop.
        let sampler = SamplingController::new(
            control.clone(),
            table.clone(),
            stats.clone(),
            user_queue.clone(),
            sys_queue.clone(),
            admission.clone(),
            shutdown.clone(),
            Duration::from_secs_f64(config.sampling_period_sec),
        );
        threads.push(spawn_worker("sampler".to_string(), false, 0, move || {
            sampler.run()
        })?);

        if let Some(join) = trace_join {
            threads.push(join);
        }

        Ok(Self {
            config,
            control,
            table,
            stats,
            user_queue,
            sys_queue,
            admission,
            trace: trace_handle,
            shutdown,
            threads,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            user_queue: self.user_queue.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    pub fn table(&self) -> &Arc<DataItemTable> {
        &self.table
    }

    pub fn stats(&self) -> &Arc<StatsMatrix> {
        &self.stats
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            mode: self.config.mode.name().to_string(),
            user_tickets_issued: self.user_queue.last_ticket(),
            sys_tickets_issued: self.sys_queue.last_ticket(),
            average_service_delay_ms: self.control.average_service_delay_ms(),
            smoothed_overload_degree: self.control.smoothed_overload_degree(),
            trace_records_dropped: self.trace.as_ref().map(|t| t.dropped()).unwrap_or(0),
        }
    }

    /// Request shutdown and join every thread. Blocked waits observe the
    /// flag within their wait slice, so this returns promptly.
    pub fn shutdown(mut self) -> ServerSummary {
        eprintln!("[SHUTDOWN] Stopping server...");
        self.shutdown.request();

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                eprintln!("[SHUTDOWN] Thread {} panicked", name);
            }
        }

        let summary = self.summary();
        eprintln!("[SHUTDOWN] Server stopped");
        summary
    }
}

fn spawn_worker<F>(
    name: String,
    pin: bool,
    pin_index: usize,
    f: F,
) -> Result<JoinHandle<()>, DynError>
where
    F: FnOnce() + Send + 'static,
{
    let thread_name = name.clone();
    let handle = std::thread::Builder::new().name(name).spawn(move || {
        if pin {
            if let Err(e) = pinning::pin_worker_thread(pin_index, &thread_name) {
                eprintln!("[THREAD-PIN] Warning: {}", e);
            }
        }
        f()
    })?;
    Ok(handle)
}
