use crate::server::types::ShutdownFlag;
use crossbeam_queue::ArrayQueue;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const TRACE_QUEUE_CAPACITY: usize = 32_768;
const TRACE_FLUSH_MAX_ITEMS: usize = 512;
const TRACE_FLUSH_INTERVAL_MS: u64 = 50;

/// One completed transaction, as written to the trace file.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub ts_ms: u64,
    pub ticket: u64,
    pub kind: &'static str,
    pub latency_us: u64,
    pub rc: i32,
}

/// Cloneable producer handle. Pushes never block the hot path: when the
/// queue is full the record is dropped and counted.
#[derive(Clone)]
pub struct TraceHandle {
    queue: Arc<ArrayQueue<TraceRecord>>,
    dropped: Arc<AtomicU64>,
}

impl TraceHandle {
    pub fn push(&self, record: TraceRecord) {
        if self.queue.push(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the background trace writer. Records drain in batches on a fixed
/// flush interval; on shutdown the queue is drained fully before exit.
pub fn spawn_trace_writer(
    path: &str,
    shutdown: ShutdownFlag,
) -> std::io::Result<(TraceHandle, JoinHandle<()>)> {
    let queue = Arc::new(ArrayQueue::new(TRACE_QUEUE_CAPACITY));
    let handle = TraceHandle {
        queue: queue.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };

    let file = File::create(path)?;
    let path_owned = path.to_string();

    let writer_handle = std::thread::Builder::new()
        .name("trace-writer".to_string())
        .spawn(move || {
            let mut out = BufWriter::new(file);
            let _ = writeln!(out, "ts_ms,ticket,kind,latency_us,rc");

            let started = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            eprintln!("[TRACE] Writing to {} (started {})", path_owned, started);

            let mut buffer: Vec<TraceRecord> = Vec::with_capacity(TRACE_FLUSH_MAX_ITEMS);
            let flush_interval = Duration::from_millis(TRACE_FLUSH_INTERVAL_MS);
            let mut next_flush = Instant::now() + flush_interval;

            loop {
                if shutdown.is_requested() {
                    eprintln!("[SHUTDOWN] Trace writer: draining queue before exit...");
                    while let Some(record) = queue.pop() {
                        buffer.push(record);
                        if buffer.len() >= TRACE_FLUSH_MAX_ITEMS {
                            flush_buffer(&mut out, &mut buffer);
                        }
                    }
                    flush_buffer(&mut out, &mut buffer);
                    let _ = out.flush();
                    eprintln!("[SHUTDOWN] Trace writer: queue drained, exiting");
                    return;
                }

                while buffer.len() < TRACE_FLUSH_MAX_ITEMS {
                    match queue.pop() {
                        Some(record) => buffer.push(record),
                        None => break,
                    }
                }

                if !buffer.is_empty() && (buffer.len() >= TRACE_FLUSH_MAX_ITEMS || Instant::now() >= next_flush) {
                    flush_buffer(&mut out, &mut buffer);
                    let _ = out.flush();
                    next_flush = Instant::now() + flush_interval;
                }

                std::thread::sleep(Duration::from_millis(5));
            }
        })?;

    Ok((handle, writer_handle))
}

fn flush_buffer(out: &mut BufWriter<File>, buffer: &mut Vec<TraceRecord>) {
    for record in buffer.drain(..) {
        if let Err(e) = writeln!(
            out,
            "{},{},{},{},{}",
            record.ts_ms, record.ticket, record.kind, record.latency_us, record.rc
        ) {
            eprintln!("[TRACE] Write failed: {}", e);
            return;
        }
    }
}
