// Core Type Definitions for the KuCoin Order Book Maintainer

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Side of the book. Asks are kept lowest first, bids highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Asks,
    Bids,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Asks => write!(f, "asks"),
            BookSide::Bids => write!(f, "bids"),
        }
    }
}

/// The three KuCoin channel families every tracked symbol is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFamily {
    /// Incremental level2 diffs (`trade.l2update`)
    Level2,
    /// Trade matches (`trade.l3match`)
    Match,
    /// Top-50 depth pushes (`level2`)
    Depth50,
}

impl ChannelFamily {
    pub const ALL: [ChannelFamily; 3] = [ChannelFamily::Level2, ChannelFamily::Match, ChannelFamily::Depth50];

    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelFamily::Level2 => "/market/level2",
            ChannelFamily::Match => "/market/match",
            ChannelFamily::Depth50 => "/spotMarket/level2Depth50",
        }
    }

    /// Topic for a comma-joined symbol list, e.g. `/market/match:BTC-USDT,ETH-USDT`
    pub fn topic(&self, symbols: &[String]) -> String {
        format!("{}:{}", self.prefix(), symbols.join(","))
    }
}

/// Topics for all channel families of the given symbols
pub fn topics_for(symbols: &[String]) -> Vec<String> {
    ChannelFamily::ALL.iter().map(|family| family.topic(symbols)).collect()
}

// ============================================================================
// BookLevel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

impl fmt::Display for BookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}          {}", self.price, self.size)
    }
}

// ============================================================================
// BookSnapshot
// ============================================================================

/// Full order book snapshot as delivered by the REST surface.
/// Prices and sizes stay as the exchange's decimal strings until applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub sequence: String,
    pub asks: Vec<[String; 2]>,
    pub bids: Vec<[String; 2]>,
}

impl fmt::Display for BookSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BookSnapshot(sequence={}, asks={}, bids={})",
            self.sequence, self.asks.len(), self.bids.len()
        )
    }
}

// ============================================================================
// Outbound records
// ============================================================================

/// Per-symbol message-rate record sent on every telemetry tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub symbol: String,
    pub id: u64,
    pub freq: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Current state of one tracked symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub id: u64,
    pub curr_price: String,
    pub best_ask: Option<BookLevel>,
    pub best_bid: Option<BookLevel>,
    pub message_freq: u64,
}

impl fmt::Display for SymbolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_level = |level: &Option<BookLevel>| {
            level.map(|l| format!("{}@{}", l.size, l.price)).unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "SymbolSummary(symbol={}, price={}, ask={}, bid={}, freq={})",
            self.symbol,
            self.curr_price,
            fmt_level(&self.best_ask),
            fmt_level(&self.best_bid),
            self.message_freq
        )
    }
}
