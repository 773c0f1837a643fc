use crate::utils::now_ms;
use dashmap::DashMap;
use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("unknown account '{0}'")]
    UnknownAccount(String),

    #[error("insufficient funds in {account}: need ${needed:.2}, have ${available:.2}")]
    InsufficientFunds {
        account: String,
        needed: f64,
        available: f64,
    },

    #[error("insufficient holdings of {symbol} in {account}: need {needed}, have {available}")]
    InsufficientHoldings {
        account: String,
        symbol: String,
        needed: u32,
        available: u32,
    },
}

/// A single stock quote as the store keeps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub low_price_day: f64,
    pub high_price_day: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
    /// Milliseconds since the UNIX epoch of the last refresh.
    pub updated_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub account_id: String,
    pub cash: f64,
    /// symbol -> shares held
    pub positions: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: u32,
    pub executed_ms: u64,
}

/// The storage collaborator consumed by the scheduling core. The core only
/// ever talks to this boundary; durability and transactional isolation are
/// the implementor's concern.
pub trait QuoteStore: Send + Sync {
    fn read_quote(&self, symbol: &str) -> Result<Quote, StoreError>;

    /// Write a fresh value for the quote (used by the refresh subsystem).
    fn refresh_quote(&self, symbol: &str) -> Result<(), StoreError>;

    /// Ordered symbol universe; consumed once at startup to build the
    /// data-item table.
    fn list_symbols(&self) -> Vec<String>;

    fn view_portfolio(&self, account_id: &str) -> Result<Portfolio, StoreError>;

    fn purchase(
        &self,
        account_id: &str,
        symbol: &str,
        price: f64,
        quantity: u32,
    ) -> Result<TradeRecord, StoreError>;

    fn sale(
        &self,
        account_id: &str,
        symbol: &str,
        price: f64,
        quantity: u32,
    ) -> Result<TradeRecord, StoreError>;
}

const DEFAULT_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOG", "AMZN", "TSLA", "META", "NVDA", "AMD", "INTC", "IBM", "ORCL", "CRM",
    "NFLX", "DIS", "PYPL", "ADBE", "CSCO", "QCOM", "TXN", "AVGO", "MU", "UBER", "LYFT", "SHOP",
    "SQ", "COIN", "PLTR", "SNOW", "NET", "DDOG", "MDB", "TEAM",
];

const DEFAULT_ACCOUNTS: usize = 100;
const STARTING_CASH: f64 = 100_000.0;
const REFRESH_VOLATILITY: f64 = 0.02;

/// In-memory quote store. Quotes and portfolios live in DashMaps so reads
/// stay lock-free across worker threads; trade records append under a
/// plain mutex (cold path).
pub struct MemoryStore {
    quotes: DashMap<String, Quote>,
    portfolios: DashMap<String, Portfolio>,
    trades: Mutex<Vec<TradeRecord>>,
    symbols: Vec<String>,
    price_noise: LogNormal<f64>,
}

impl MemoryStore {
    pub fn with_default_universe() -> Self {
        Self::new(DEFAULT_SYMBOLS, DEFAULT_ACCOUNTS)
    }

    pub fn new(symbols: &[&str], num_accounts: usize) -> Self {
        let mut rng = rand::thread_rng();
        let quotes = DashMap::new();
        for symbol in symbols {
            let price: f64 = rng.gen_range(10.0..1000.0);
            quotes.insert(
                symbol.to_string(),
                Quote {
                    symbol: symbol.to_string(),
                    price,
                    low_price_day: price,
                    high_price_day: price,
                    bid: price * 0.999,
                    ask: price * 1.001,
                    volume: 0,
                    updated_ms: now_ms(),
                },
            );
        }

        let portfolios = DashMap::new();
        for i in 0..num_accounts {
            let account_id = format!("acct-{:04}", i);
            portfolios.insert(
                account_id.clone(),
                Portfolio {
                    account_id,
                    cash: STARTING_CASH,
                    positions: HashMap::new(),
                },
            );
        }

        Self {
            quotes,
            portfolios,
            trades: Mutex::new(Vec::new()),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            // volatility is small and fixed, construction cannot fail
            price_noise: LogNormal::new(0.0, REFRESH_VOLATILITY).unwrap(),
        }
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.portfolios.iter().map(|p| p.key().clone()).collect()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().unwrap().len()
    }

    fn record_trade(&self, record: &TradeRecord) {
        self.trades.lock().unwrap().push(record.clone());
    }
}

impl QuoteStore for MemoryStore {
    fn read_quote(&self, symbol: &str) -> Result<Quote, StoreError> {
        self.quotes
            .get(symbol)
            .map(|q| q.clone())
            .ok_or_else(|| StoreError::UnknownSymbol(symbol.to_string()))
    }

    fn refresh_quote(&self, symbol: &str) -> Result<(), StoreError> {
        let mut entry = self
            .quotes
            .get_mut(symbol)
            .ok_or_else(|| StoreError::UnknownSymbol(symbol.to_string()))?;

        let multiplier = self.price_noise.sample(&mut rand::thread_rng());
        let price = entry.price * multiplier;
        entry.price = price;
        entry.low_price_day = entry.low_price_day.min(price);
        entry.high_price_day = entry.high_price_day.max(price);
        entry.bid = price * 0.999;
        entry.ask = price * 1.001;
        entry.updated_ms = now_ms();
        Ok(())
    }

    fn list_symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }

    fn view_portfolio(&self, account_id: &str) -> Result<Portfolio, StoreError> {
        self.portfolios
            .get(account_id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))
    }

    fn purchase(
        &self,
        account_id: &str,
        symbol: &str,
        price: f64,
        quantity: u32,
    ) -> Result<TradeRecord, StoreError> {
        if !self.quotes.contains_key(symbol) {
            return Err(StoreError::UnknownSymbol(symbol.to_string()));
        }

        let cost = price * quantity as f64;
        let mut portfolio = self
            .portfolios
            .get_mut(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))?;

        // Capital check under the entry lock; the debit and the position
        // credit commit together or not at all.
        if portfolio.cash < cost {
            return Err(StoreError::InsufficientFunds {
                account: account_id.to_string(),
                needed: cost,
                available: portfolio.cash,
            });
        }

        portfolio.cash -= cost;
        *portfolio.positions.entry(symbol.to_string()).or_insert(0) += quantity;
        drop(portfolio);

        if let Some(mut quote) = self.quotes.get_mut(symbol) {
            quote.volume += quantity as u64;
        }

        let record = TradeRecord {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            price,
            quantity,
            executed_ms: now_ms(),
        };
        self.record_trade(&record);
        Ok(record)
    }

    fn sale(
        &self,
        account_id: &str,
        symbol: &str,
        price: f64,
        quantity: u32,
    ) -> Result<TradeRecord, StoreError> {
        if !self.quotes.contains_key(symbol) {
            return Err(StoreError::UnknownSymbol(symbol.to_string()));
        }

        let mut portfolio = self
            .portfolios
            .get_mut(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))?;

        let held = portfolio.positions.get(symbol).copied().unwrap_or(0);
        if held < quantity {
            return Err(StoreError::InsufficientHoldings {
                account: account_id.to_string(),
                symbol: symbol.to_string(),
                needed: quantity,
                available: held,
            });
        }

        if held == quantity {
            portfolio.positions.remove(symbol);
        } else {
            *portfolio.positions.get_mut(symbol).unwrap() = held - quantity;
        }
        portfolio.cash += price * quantity as f64;
        drop(portfolio);

        if let Some(mut quote) = self.quotes.get_mut(symbol) {
            quote.volume += quantity as u64;
        }

        let record = TradeRecord {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            price,
            quantity,
            executed_ms: now_ms(),
        };
        self.record_trade(&record);
        Ok(record)
    }
}
