//! In-process benchmark run: synthetic client threads drive the server
//! with the classic workload mix (60% view-stock, the rest uniform among
//! portfolio/purchase/sale), then print a run summary.

use quotebench::config::ServerConfig;
use quotebench::server::types::{ItemRef, TransactionKind, TxnPayload};
use quotebench::server::{Server, ServerHandle};
use quotebench::store::{MemoryStore, QuoteStore};
use quotebench::utils::ts_hm;
use quotebench::DynError;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const VIEW_STOCK_SHARE: f64 = 0.60;
const MIN_ITEMS_PER_VIEW: usize = 50;
const MAX_ITEMS_PER_VIEW: usize = 100;
const THINK_TIME_MIN_MS: u64 = 300;
const THINK_TIME_MAX_MS: u64 = 500;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ClientCounters {
    submitted: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

fn client_loop(
    client_id: usize,
    handle: ServerHandle,
    symbols: Arc<Vec<String>>,
    accounts: Arc<Vec<String>>,
    deadline: Instant,
    counters: Arc<ClientCounters>,
) {
    let mut rng = rand::thread_rng();
    let account = accounts[client_id % accounts.len()].clone();

    while Instant::now() < deadline && !handle.is_shutdown() {
        let (kind, items) = build_transaction(&mut rng, &symbols, &account);

        let pending = match handle.submit(kind, items) {
            Ok(pending) => pending,
            Err(_) => break, // shutdown while blocked on a full queue
        };
        counters.submitted.fetch_add(1, Ordering::Relaxed);

        match pending.wait(COMPLETION_TIMEOUT) {
            Some(0) => counters.ok.fetch_add(1, Ordering::Relaxed),
            Some(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
            None => counters.timed_out.fetch_add(1, Ordering::Relaxed),
        };

        let think_ms = rng.gen_range(THINK_TIME_MIN_MS..=THINK_TIME_MAX_MS);
        std::thread::sleep(Duration::from_millis(think_ms));
    }
}

fn build_transaction(
    rng: &mut impl Rng,
    symbols: &[String],
    account: &str,
) -> (TransactionKind, TxnPayload) {
    let mut items = TxnPayload::new();

    if rng.gen_bool(VIEW_STOCK_SHARE) {
        // Symbols may repeat within one payload; only the count is bounded.
        let count = rng.gen_range(MIN_ITEMS_PER_VIEW..=MAX_ITEMS_PER_VIEW);
        for _ in 0..count {
            let id = rng.gen_range(0..symbols.len());
            items.push(ItemRef::view_stock(id, symbols[id].clone()));
        }
        return (TransactionKind::ViewStock, items);
    }

    match rng.gen_range(0..3) {
        0 => {
            items.push(ItemRef::view_portfolio(account));
            (TransactionKind::ViewPortfolio, items)
        }
        1 => {
            let id = rng.gen_range(0..symbols.len());
            let price = rng.gen_range(10.0..500.0);
            let quantity = rng.gen_range(1..10);
            items.push(ItemRef::trade(account, id, symbols[id].clone(), price, quantity));
            (TransactionKind::Purchase, items)
        }
        _ => {
            let id = rng.gen_range(0..symbols.len());
            let price = rng.gen_range(10.0..500.0);
            let quantity = rng.gen_range(1..10);
            items.push(ItemRef::trade(account, id, symbols[id].clone(), price, quantity));
            (TransactionKind::Sale, items)
        }
    }
}

fn main() -> Result<(), DynError> {
    dotenv::dotenv().ok();

    let config = ServerConfig::from_env()?;
    let num_clients: usize = std::env::var("QB_NUM_CLIENTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);
    let duration_sec: u64 = std::env::var("QB_DURATION_SEC")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let store = Arc::new(MemoryStore::with_default_universe());
    let symbols = Arc::new(store.list_symbols());
    let accounts = Arc::new(store.account_ids());

    let server = Server::start(config, store.clone())?;

    eprintln!(
        "[DEMO] {} Driving {} clients for {}s",
        ts_hm(),
        num_clients,
        duration_sec
    );

    let counters = Arc::new(ClientCounters::default());
    let deadline = Instant::now() + Duration::from_secs(duration_sec);
    let mut clients = Vec::with_capacity(num_clients);
    for client_id in 0..num_clients {
        let handle = server.handle();
        let symbols = symbols.clone();
        let accounts = accounts.clone();
        let counters = counters.clone();
        clients.push(
            std::thread::Builder::new()
                .name(format!("client-{}", client_id))
                .spawn(move || {
                    client_loop(client_id, handle, symbols, accounts, deadline, counters)
                })?,
        );
    }

    for client in clients {
        let _ = client.join();
    }

    eprintln!("[DEMO] {} Clients finished, stopping server", ts_hm());
    let summary = server.shutdown();

    eprintln!("=== Run Summary ===");
    eprintln!("mode:                 {}", summary.mode);
    eprintln!("submitted:            {}", counters.submitted.load(Ordering::Relaxed));
    eprintln!("ok:                   {}", counters.ok.load(Ordering::Relaxed));
    eprintln!("failed:               {}", counters.failed.load(Ordering::Relaxed));
    eprintln!("timed out:            {}", counters.timed_out.load(Ordering::Relaxed));
    eprintln!("user tickets issued:  {}", summary.user_tickets_issued);
    eprintln!("refresh tickets:      {}", summary.sys_tickets_issued);
    eprintln!("avg service delay:    {:.2}ms", summary.average_service_delay_ms);
    eprintln!("smoothed overload:    {:.4}", summary.smoothed_overload_degree);
    eprintln!("trace drops:          {}", summary.trace_records_dropped);
    eprintln!(
        "summary json: {}",
        serde_json::to_string(&summary).unwrap_or_default()
    );

    Ok(())
}
