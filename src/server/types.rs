use crate::store::StoreError;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A transaction touches at most this many data items.
pub const MAX_ITEMS_PER_TXN: usize = 100;

/// Result code reported back to the submitting client.
pub const RC_OK: i32 = 0;
pub const RC_FAILED: i32 = 1;
pub const RC_ABORTED: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Base,
    AdmissionControl,
    AdaptiveUpdate,
    Full,
}

impl RunningMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Some(RunningMode::Base),
            "ac" => Some(RunningMode::AdmissionControl),
            "aup" => Some(RunningMode::AdaptiveUpdate),
            "full" => Some(RunningMode::Full),
            _ => None,
        }
    }

    /// Overload throttling is only active in these modes.
    pub fn admission_enabled(self) -> bool {
        matches!(self, RunningMode::AdmissionControl | RunningMode::Full)
    }

    /// Per-item refresh periods only adapt in these modes.
    pub fn adaptive_updates_enabled(self) -> bool {
        matches!(self, RunningMode::AdaptiveUpdate | RunningMode::Full)
    }

    pub fn name(self) -> &'static str {
        match self {
            RunningMode::Base => "base",
            RunningMode::AdmissionControl => "ac",
            RunningMode::AdaptiveUpdate => "aup",
            RunningMode::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ViewStock,
    ViewPortfolio,
    Purchase,
    Sale,
    SystemRefresh,
}

impl TransactionKind {
    pub fn name(self) -> &'static str {
        match self {
            TransactionKind::ViewStock => "view_stock",
            TransactionKind::ViewPortfolio => "view_portfolio",
            TransactionKind::Purchase => "purchase",
            TransactionKind::Sale => "sale",
            TransactionKind::SystemRefresh => "system_refresh",
        }
    }

    pub fn is_user(self) -> bool {
        !matches!(self, TransactionKind::SystemRefresh)
    }
}

/// One data-item reference inside a transaction payload. Fields beyond
/// `symbol_id`/`symbol` are only meaningful for the kinds that carry them.
#[derive(Debug, Clone)]
pub struct ItemRef {
    /// Index into the server's data-item table; `usize::MAX` when the
    /// transaction does not target a tracked quote (e.g. ViewPortfolio).
    pub symbol_id: usize,
    pub symbol: String,
    pub account_id: String,
    pub price: f64,
    pub quantity: u32,
}

impl ItemRef {
    pub fn view_stock(symbol_id: usize, symbol: impl Into<String>) -> Self {
        Self {
            symbol_id,
            symbol: symbol.into(),
            account_id: String::new(),
            price: 0.0,
            quantity: 0,
        }
    }

    pub fn view_portfolio(account_id: impl Into<String>) -> Self {
        Self {
            symbol_id: usize::MAX,
            symbol: String::new(),
            account_id: account_id.into(),
            price: 0.0,
            quantity: 0,
        }
    }

    pub fn trade(
        account_id: impl Into<String>,
        symbol_id: usize,
        symbol: impl Into<String>,
        price: f64,
        quantity: u32,
    ) -> Self {
        Self {
            symbol_id,
            symbol: symbol.into(),
            account_id: account_id.into(),
            price,
            quantity,
        }
    }
}

pub type TxnPayload = SmallVec<[ItemRef; 4]>;

/// Shared result slot between the submitting context and the worker that
/// finishes the transaction. `result` is published before `done`.
#[derive(Debug, Default)]
pub struct TxnCompletion {
    done: AtomicBool,
    result: AtomicI32,
}

impl TxnCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finish(&self, rc: i32) {
        self.result.store(rc, Ordering::Relaxed);
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn result_code(&self) -> i32 {
        self.result.load(Ordering::Relaxed)
    }

    /// Poll for completion, sleeping between probes. Returns the result
    /// code, or None on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        while !self.is_done() {
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Some(self.result_code())
    }
}

/// A pending unit of work, owned by a queue slot while enqueued.
#[derive(Debug, Clone)]
pub struct TxnRequest {
    pub kind: TransactionKind,
    pub items: TxnPayload,
    pub enqueue_ms: u64,
    /// Assigned by the queue at enqueue; 0 until then.
    pub ticket: u64,
    pub completion: Arc<TxnCompletion>,
}

impl TxnRequest {
    pub fn new(kind: TransactionKind, items: TxnPayload, enqueue_ms: u64) -> Self {
        debug_assert!(items.len() <= MAX_ITEMS_PER_TXN);
        Self {
            kind,
            items,
            enqueue_ms,
            ticket: 0,
            completion: TxnCompletion::new(),
        }
    }

    pub fn system_refresh(symbol_id: usize, symbol: impl Into<String>, enqueue_ms: u64) -> Self {
        let mut items = TxnPayload::new();
        items.push(ItemRef::view_stock(symbol_id, symbol));
        Self::new(TransactionKind::SystemRefresh, items, enqueue_ms)
    }
}

/// Cloneable handle on the process-wide shutdown flag. Every blocking wait
/// and scan loop observes it; there is no per-request cancellation.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    /// Shutdown observed while blocked. A termination signal, not a failure.
    #[error("aborted by shutdown")]
    Aborted,

    /// The storage collaborator rejected the transaction. Recorded in the
    /// stats matrix and surfaced as a non-zero result code, never retried.
    #[error("transaction failed: {0}")]
    TransactionFailed(#[from] StoreError),
}
