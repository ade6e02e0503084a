// Layer 2 - Order book maintenance
// Merges the live feed into per-symbol books and publishes what changed

pub mod orderbook;
pub mod parser;
pub mod registry;
pub mod signal;
pub mod loader;
pub mod maintainer;
pub mod metrics;

// Re-export commonly used items
pub use orderbook::{
    OrderBook, OrderBookError, BookChanges, RawChange, PendingUpdate, ChangeOutcome, MergeReport,
};
pub use parser::{FeedMessage, ParseError, parse_feed_message};
pub use registry::{SymbolState, SymbolRegistry, DirtySet, WatchSet};
pub use loader::{BaselineLoader, Backoff};
pub use maintainer::{OrderBookMaintainer, MaintainerError};
pub use metrics::{MaintainerCounters, MaintainerMetrics};
