// Symbol Registry - per-symbol state behind one mutex each, plus the dirty and watch sets
// Every worker goes through here; nothing else holds book state

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::layer2::orderbook::OrderBook;

/// Everything tracked for one symbol
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub book: OrderBook,
    /// Last trade price as the exchange's decimal string
    pub current_price: String,
    /// Feed messages seen this telemetry interval
    pub message_count: u64,
    /// `message_count` captured at the last telemetry tick
    pub last_known_frequency: u64,
    /// Snapshot/price fetch failures since the last telemetry tick
    pub retries: u64,
    /// Set by construction and subscribe; books recreated for late feed data stay untracked
    pub tracked: bool,
}

impl SymbolState {
    pub fn new() -> Self {
        Self {
            book: OrderBook::new(),
            current_price: "0".to_string(),
            message_count: 0,
            last_known_frequency: 0,
            retries: 0,
            tracked: false,
        }
    }

    /// Close the current telemetry interval: returns (freq, retries) and resets both
    pub fn roll_interval(&mut self) -> (u64, u64) {
        let freq = self.message_count;
        let retries = self.retries;
        self.last_known_frequency = freq;
        self.message_count = 0;
        self.retries = 0;
        (freq, retries)
    }
}

impl Default for SymbolState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSymbol = Arc<Mutex<SymbolState>>;

/// Per-symbol state. Only tracked entries count as subscribed; the rest are books
/// recreated for feed data that arrived after an unsubscribe.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    symbols: RwLock<HashMap<String, SharedSymbol>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing state for `symbol`, or a fresh untracked one registered on the spot
    pub fn get_or_create(&self, symbol: &str) -> SharedSymbol {
        if let Some(state) = self.symbols.read().get(symbol) {
            return Arc::clone(state);
        }
        let mut symbols = self.symbols.write();
        Arc::clone(
            symbols
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SymbolState::new()))),
        )
    }

    /// Start tracking `symbol`, keeping any book already held for it
    pub fn track(&self, symbol: &str) -> SharedSymbol {
        let state = self.get_or_create(symbol);
        state.lock().tracked = true;
        state
    }

    /// Any state held for `symbol`, tracked or not
    pub fn get(&self, symbol: &str) -> Option<SharedSymbol> {
        self.symbols.read().get(symbol).cloned()
    }

    pub fn get_tracked(&self, symbol: &str) -> Option<SharedSymbol> {
        self.get(symbol).filter(|state| state.lock().tracked)
    }

    /// Drops the symbol's state entirely. Returns false if nothing was held.
    pub fn remove(&self, symbol: &str) -> bool {
        self.symbols.write().remove(symbol).is_some()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains_key(symbol)
    }

    /// Tracked symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        self.entries().into_iter().map(|(symbol, _)| symbol).collect()
    }

    /// Tracked (symbol, state) pairs, sorted by symbol
    pub fn entries(&self) -> Vec<(String, SharedSymbol)> {
        // Flags are read after the map lock is released
        let all: Vec<(String, SharedSymbol)> =
            self.symbols.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
        let mut entries: Vec<(String, SharedSymbol)> =
            all.into_iter().filter(|(_, state)| state.lock().tracked).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of tracked symbols
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Symbols changed since their last publish, with wake-on-mark
#[derive(Debug, Default)]
pub struct DirtySet {
    symbols: Mutex<HashSet<String>>,
    notify: Notify,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, symbol: &str) {
        let inserted = self.symbols.lock().insert(symbol.to_string());
        if inserted {
            self.notify.notify_one();
        }
    }

    /// Take an arbitrary dirty symbol without waiting
    pub fn pop(&self) -> Option<String> {
        let mut symbols = self.symbols.lock();
        let symbol = symbols.iter().next().cloned()?;
        symbols.remove(&symbol);
        Some(symbol)
    }

    /// Wait until a symbol is dirty and take it
    pub async fn next(&self) -> String {
        loop {
            if let Some(symbol) = self.pop() {
                return symbol;
            }
            self.notify.notified().await;
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.lock().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.lock().is_empty()
    }
}

/// Symbols a downstream consumer wants change notifications for
#[derive(Debug, Default)]
pub struct WatchSet {
    symbols: RwLock<HashSet<String>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, symbols: &[String]) {
        self.symbols.write().extend(symbols.iter().cloned());
    }

    pub fn remove(&self, symbols: &[String]) {
        let mut watched = self.symbols.write();
        for symbol in symbols {
            watched.remove(symbol);
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.symbols.read().clone()
    }
}
