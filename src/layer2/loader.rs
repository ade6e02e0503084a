// Baseline Loader - REST snapshots and last-trade prices, retried until they succeed
// Backoff doubles per failure up to a cap; only shutdown ends the retry loop

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::{BookSnapshot, MaintainerConfig};
use crate::layer1::feed::SnapshotSource;
use crate::layer2::maintainer::MaintainerError;
use crate::layer2::metrics::MaintainerCounters;
use crate::layer2::orderbook::{parse_sequence, OrderBookError};
use crate::layer2::registry::{DirtySet, SymbolRegistry};
use crate::layer2::signal::Flag;

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial.min(max), max }
    }

    /// Delay to wait now; the next one doubles
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Apply `[price, size]` levels as the symbol's new baseline and mark it dirty.
/// Unknown symbols get a fresh, untracked book.
pub fn apply_baseline(
    registry: &SymbolRegistry,
    dirty: &DirtySet,
    symbol: &str,
    asks: &[[String; 2]],
    bids: &[[String; 2]],
    sequence: u64,
) -> Result<(), OrderBookError> {
    let state = registry.get_or_create(symbol);
    state.lock().book.apply_snapshot(asks, bids, sequence)?;
    dirty.mark(symbol);
    Ok(())
}

pub struct BaselineLoader<S: SnapshotSource> {
    source: Arc<S>,
    registry: Arc<SymbolRegistry>,
    dirty: Arc<DirtySet>,
    counters: Arc<MaintainerCounters>,
    shutdown: Flag,
    id: u64,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl<S: SnapshotSource> BaselineLoader<S> {
    pub fn new(
        source: Arc<S>,
        registry: Arc<SymbolRegistry>,
        dirty: Arc<DirtySet>,
        counters: Arc<MaintainerCounters>,
        shutdown: Flag,
        config: &MaintainerConfig,
    ) -> Self {
        Self {
            source,
            registry,
            dirty,
            counters,
            shutdown,
            id: config.id,
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_backoff, self.max_backoff)
    }

    fn record_retry(&self, symbol: &str, counter: &AtomicU64) {
        MaintainerCounters::incr(counter);
        if let Some(state) = self.registry.get(symbol) {
            state.lock().retries += 1;
        }
    }

    /// Sleep for `delay` unless shutdown arrives first
    async fn wait_before_retry(&self, delay: Duration) -> Result<(), MaintainerError> {
        tokio::select! {
            biased;
            _ = self.shutdown.wait_for(true) => Err(MaintainerError::ShuttingDown),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn apply_snapshot(&self, symbol: &str, snapshot: &BookSnapshot) -> Result<(), OrderBookError> {
        let sequence = parse_sequence(&snapshot.sequence)?;
        apply_baseline(&self.registry, &self.dirty, symbol, &snapshot.asks, &snapshot.bids, sequence)
    }

    /// Fetch and apply a full snapshot, retrying every failure.
    /// Returns only on success or shutdown.
    pub async fn refetch_snapshot(&self, symbol: &str) -> Result<(), MaintainerError> {
        let mut backoff = self.backoff();
        loop {
            if self.shutdown.is_set() {
                return Err(MaintainerError::ShuttingDown);
            }

            let error = match self.source.get_order_book(symbol).await {
                Ok(snapshot) => match self.apply_snapshot(symbol, &snapshot) {
                    Ok(()) => {
                        debug!(symbol = symbol, id = self.id, sequence = %snapshot.sequence, "Applied snapshot");
                        return Ok(());
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            warn!(symbol = symbol, id = self.id, error = %error, "Failed to get snapshot, retrying");
            self.record_retry(symbol, &self.counters.snapshot_retries);
            self.wait_before_retry(backoff.next_delay()).await?;
        }
    }

    /// Seed the symbol's current price from recent trade history, retrying every failure.
    /// No dirty mark: the price is surfaced through queries only.
    pub async fn cache_price(&self, symbol: &str) -> Result<(), MaintainerError> {
        let mut backoff = self.backoff();
        loop {
            if self.shutdown.is_set() {
                return Err(MaintainerError::ShuttingDown);
            }

            match self.source.get_last_trade_price(symbol).await {
                Ok(price) => {
                    match self.registry.get_tracked(symbol) {
                        Some(state) => state.lock().current_price = price,
                        None => info!(symbol = symbol, id = self.id, "Symbol removed before price was cached"),
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(symbol = symbol, id = self.id, error = %e, "Failed to cache price, retrying");
                    self.record_retry(symbol, &self.counters.price_retries);
                    self.wait_before_retry(backoff.next_delay()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer1::rest_client::RestClientError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted responses; the last one repeats
    struct ScriptedSource {
        books: Mutex<VecDeque<Result<BookSnapshot, String>>>,
        prices: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedSource {
        fn new(books: Vec<Result<BookSnapshot, String>>, prices: Vec<Result<String, String>>) -> Self {
            Self { books: Mutex::new(books.into()), prices: Mutex::new(prices.into()) }
        }

        fn take<T: Clone>(queue: &Mutex<VecDeque<Result<T, String>>>) -> Result<T, RestClientError> {
            let mut queue = queue.lock();
            let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            next.unwrap_or_else(|| Err("empty script".to_string()))
                .map_err(|message| RestClientError::Api { code: "500000".to_string(), message })
        }
    }

    impl SnapshotSource for ScriptedSource {
        async fn get_order_book(&self, _symbol: &str) -> Result<BookSnapshot, RestClientError> {
            Self::take(&self.books)
        }

        async fn get_last_trade_price(&self, _symbol: &str) -> Result<String, RestClientError> {
            Self::take(&self.prices)
        }
    }

    fn snapshot(sequence: &str) -> BookSnapshot {
        BookSnapshot {
            sequence: sequence.to_string(),
            asks: vec![["100.0".to_string(), "1".to_string()]],
            bids: vec![["99.0".to_string(), "2".to_string()]],
        }
    }

    fn loader(source: ScriptedSource, shutdown: Flag) -> (BaselineLoader<ScriptedSource>, Arc<SymbolRegistry>, Arc<DirtySet>, Arc<MaintainerCounters>) {
        let registry = Arc::new(SymbolRegistry::new());
        let dirty = Arc::new(DirtySet::new());
        let counters = Arc::new(MaintainerCounters::new());
        let config = MaintainerConfig { retry_initial_backoff_ms: 1, retry_max_backoff_ms: 4, ..Default::default() };
        let loader = BaselineLoader::new(
            Arc::new(source),
            Arc::clone(&registry),
            Arc::clone(&dirty),
            Arc::clone(&counters),
            shutdown,
            &config,
        );
        (loader, registry, dirty, counters)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);
    }

    #[tokio::test]
    async fn test_snapshot_retries_until_success() {
        let source = ScriptedSource::new(
            vec![Err("timeout".to_string()), Err("timeout".to_string()), Ok(snapshot("42"))],
            vec![Ok("100.5".to_string())],
        );
        let (loader, registry, dirty, counters) = loader(source, Flag::new());
        registry.get_or_create("BTC-USDT");

        loader.refetch_snapshot("BTC-USDT").await.unwrap();

        let state = registry.get("BTC-USDT").unwrap();
        assert_eq!(state.lock().book.sequence(), 42);
        assert_eq!(state.lock().retries, 2);
        assert!(dirty.contains("BTC-USDT"));
        assert_eq!(counters.snapshot(0, 0, 0).snapshot_retries, 2);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_retried() {
        let source = ScriptedSource::new(
            vec![Ok(snapshot("not-a-number")), Ok(snapshot("7"))],
            vec![Ok("1".to_string())],
        );
        let (loader, registry, _dirty, _counters) = loader(source, Flag::new());

        loader.refetch_snapshot("ETH-USDT").await.unwrap();
        assert_eq!(registry.get("ETH-USDT").unwrap().lock().book.sequence(), 7);
    }

    #[tokio::test]
    async fn test_cache_price_does_not_mark_dirty() {
        let source = ScriptedSource::new(
            vec![Ok(snapshot("1"))],
            vec![Err("boom".to_string()), Ok("27123.4".to_string())],
        );
        let (loader, registry, dirty, counters) = loader(source, Flag::new());
        registry.track("BTC-USDT");

        loader.cache_price("BTC-USDT").await.unwrap();
        assert_eq!(registry.get("BTC-USDT").unwrap().lock().current_price, "27123.4");
        assert!(dirty.is_empty());
        assert_eq!(counters.snapshot(0, 0, 0).price_retries, 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_retry_loop() {
        let source = ScriptedSource::new(vec![Err("down".to_string())], vec![Err("down".to_string())]);
        let shutdown = Flag::new();
        let (loader, _registry, _dirty, _counters) = loader(source, shutdown.clone());

        let stopper = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                shutdown.set(true);
            })
        };

        let result = tokio::time::timeout(Duration::from_secs(2), loader.refetch_snapshot("BTC-USDT")).await.unwrap();
        assert!(matches!(result, Err(MaintainerError::ShuttingDown)));
        stopper.await.unwrap();
    }
}
