// Order Book Maintainer - keeps live books for a set of KuCoin symbols
//
// Workers (all tokio tasks, sharing state through the symbol registry):
//   feed pump   -> classifies feed events; depth updates go on the merge queue
//   merge       -> drains the queue into the books
//   publisher   -> sends dirty, watched symbols to the IPC destination
//   telemetry   -> per-symbol message rate every interval
// Each per-symbol state sits behind its own mutex; no lock is held across an await.

use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::core::{topics_for, ConfigError, MaintainerConfig, SymbolSummary, TelemetryRecord};
use crate::layer1::feed::{FeedError, FeedEvent, MarketFeed, SnapshotSource};
use crate::layer1::ipc::IpcPublisher;
use crate::layer2::loader::{apply_baseline, BaselineLoader};
use crate::layer2::metrics::{MaintainerCounters, MaintainerMetrics};
use crate::layer2::orderbook::PendingUpdate;
use crate::layer2::parser::{parse_feed_message, FeedMessage};
use crate::layer2::registry::{DirtySet, SymbolRegistry, WatchSet};
use crate::layer2::signal::Flag;

#[derive(Debug, Error)]
pub enum MaintainerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("Maintainer is shutting down")]
    ShuttingDown,
}

/// State shared by the public handle and every worker
struct Inner<F: MarketFeed, S: SnapshotSource> {
    id: u64,
    default_depth: usize,
    telemetry_interval: Duration,
    feed: Arc<F>,
    loader: BaselineLoader<S>,
    registry: Arc<SymbolRegistry>,
    dirty: Arc<DirtySet>,
    watch: WatchSet,
    counters: Arc<MaintainerCounters>,
    publisher: Option<IpcPublisher>,
    queue_tx: mpsc::UnboundedSender<PendingUpdate>,
    shutdown: Flag,
    paused: Flag,
}

impl<F: MarketFeed, S: SnapshotSource> Inner<F, S> {
    /// Route one raw feed message. Never blocks: depth updates are only queued.
    fn handle_message(&self, raw: &str) {
        MaintainerCounters::incr(&self.counters.feed_messages);

        match parse_feed_message(raw) {
            Ok(FeedMessage::DepthUpdate(update)) => {
                let Some(state) = self.registry.get_tracked(&update.symbol) else {
                    trace!(symbol = %update.symbol, "Depth update for untracked symbol");
                    return;
                };
                state.lock().message_count += 1;
                self.enqueue(update);
            }
            Ok(FeedMessage::TradeMatch { symbol, price }) => {
                let Some(state) = self.registry.get_tracked(&symbol) else {
                    trace!(symbol = %symbol, "Trade for untracked symbol");
                    return;
                };
                let changed = {
                    let mut state = state.lock();
                    state.message_count += 1;
                    if state.current_price != price {
                        state.current_price = price;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    self.dirty.mark(&symbol);
                }
            }
            Ok(FeedMessage::DepthSnapshot { symbol, asks, bids }) => {
                if let Err(e) = apply_baseline(&self.registry, &self.dirty, &symbol, &asks, &bids, 0) {
                    warn!(symbol = %symbol, id = self.id, error = %e, "Dropping malformed depth push");
                }
            }
            Ok(FeedMessage::Ignored) => {}
            Err(e) => {
                MaintainerCounters::incr(&self.counters.parse_errors);
                debug!(id = self.id, error = %e, "Unparseable feed message");
            }
        }
    }

    fn enqueue(&self, update: PendingUpdate) {
        if self.queue_tx.send(update).is_ok() {
            MaintainerCounters::incr(&self.counters.queue_depth);
        } else {
            debug!(id = self.id, "Merge queue closed, dropping update");
        }
    }

    /// Fold one queued update into its book. Unknown symbols get a fresh, untracked book.
    fn merge_update(&self, update: &PendingUpdate) {
        let state = self.registry.get_or_create(&update.symbol);
        let report = state.lock().book.merge(&update.changes);

        MaintainerCounters::add(&self.counters.updates_merged, report.applied);
        MaintainerCounters::add(&self.counters.stale_dropped, report.stale);
        MaintainerCounters::add(&self.counters.malformed_dropped, report.malformed);
        if report.malformed > 0 {
            warn!(symbol = %update.symbol, id = self.id, malformed = report.malformed, "Skipped malformed changes");
        }
        if report.best_changed {
            self.dirty.mark(&update.symbol);
        }
        trace!(symbol = %update.symbol, applied = report.applied, stale = report.stale, "Merged update");
    }

    /// Re-snapshot every tracked symbol
    async fn resync_all(&self) -> Result<(), MaintainerError> {
        let symbols = self.registry.symbols();
        info!(id = self.id, symbols = symbols.len(), "Resynchronising books after reconnect");
        MaintainerCounters::incr(&self.counters.resyncs);
        for symbol in &symbols {
            self.loader.refetch_snapshot(symbol).await?;
        }
        Ok(())
    }

    /// Close the telemetry interval for every tracked symbol and send the records
    async fn emit_telemetry(&self) -> Vec<TelemetryRecord> {
        let records: Vec<TelemetryRecord> = self
            .registry
            .entries()
            .into_iter()
            .map(|(symbol, state)| {
                let (freq, retries) = state.lock().roll_interval();
                TelemetryRecord { symbol, id: self.id, freq, retries }
            })
            .collect();

        if let Some(publisher) = &self.publisher {
            for record in &records {
                if let Err(e) = publisher.send_telemetry(record).await {
                    warn!(symbol = %record.symbol, id = self.id, error = %e, "Failed to send telemetry");
                }
            }
        }
        records
    }

    /// Resolves once not paused; false if shutdown came first
    async fn wait_while_paused(&self) -> bool {
        if !self.paused.is_set() {
            return true;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.wait_for(true) => false,
            _ = self.paused.wait_for(false) => true,
        }
    }
}

async fn run_feed_pump<F: MarketFeed, S: SnapshotSource>(inner: Arc<Inner<F, S>>) {
    info!(id = inner.id, "Feed pump started");
    loop {
        let event = tokio::select! {
            biased;
            _ = inner.shutdown.wait_for(true) => break,
            event = inner.feed.recv() => event,
        };

        match event {
            Some(FeedEvent::Message(raw)) => inner.handle_message(&raw),
            Some(FeedEvent::Reconnected) => {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    if let Err(e) = inner.resync_all().await {
                        debug!(id = inner.id, error = %e, "Resync abandoned");
                    }
                });
            }
            None => {
                info!(id = inner.id, "Feed closed");
                break;
            }
        }
    }
    info!(id = inner.id, "Feed pump stopped");
}

async fn run_merge_worker<F: MarketFeed, S: SnapshotSource>(
    inner: Arc<Inner<F, S>>,
    mut queue_rx: mpsc::UnboundedReceiver<PendingUpdate>,
) {
    info!(id = inner.id, "Merge worker started");
    loop {
        let update = tokio::select! {
            biased;
            _ = inner.shutdown.wait_for(true) => break,
            update = queue_rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };
        if !inner.wait_while_paused().await {
            break;
        }
        MaintainerCounters::decr(&inner.counters.queue_depth);
        inner.merge_update(&update);
    }
    info!(id = inner.id, "Merge worker stopped");
}

async fn run_publisher<F: MarketFeed, S: SnapshotSource>(inner: Arc<Inner<F, S>>) {
    let Some(publisher) = inner.publisher.as_ref() else {
        return;
    };
    info!(id = inner.id, address = %publisher.address().display(), "Publisher started");

    loop {
        let symbol = tokio::select! {
            biased;
            _ = inner.shutdown.wait_for(true) => break,
            symbol = inner.dirty.next() => symbol,
        };
        if !inner.wait_while_paused().await {
            break;
        }

        if inner.feed.is_shutting_down() {
            error!(id = inner.id, "Feed is shutting down, stopping publisher");
            break;
        }
        if !inner.watch.contains(&symbol) {
            continue;
        }

        match publisher.send_symbol(&symbol).await {
            Ok(()) => MaintainerCounters::incr(&inner.counters.notifications_published),
            Err(e) => {
                MaintainerCounters::incr(&inner.counters.notifications_failed);
                warn!(symbol = %symbol, id = inner.id, error = %e, "Failed to publish change");
            }
        }
    }
    info!(id = inner.id, "Publisher stopped");
}

async fn run_telemetry<F: MarketFeed, S: SnapshotSource>(inner: Arc<Inner<F, S>>) {
    let mut ticker = tokio::time::interval(inner.telemetry_interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.wait_for(true) => break,
            _ = ticker.tick() => {
                let records = inner.emit_telemetry().await;
                debug!(id = inner.id, symbols = records.len(), "Telemetry emitted");
            }
        }
    }
    debug!(id = inner.id, "Telemetry worker stopped");
}

/// Live order books for a set of symbols, fed by a [`MarketFeed`] and seeded from a [`SnapshotSource`]
pub struct OrderBookMaintainer<F: MarketFeed, S: SnapshotSource> {
    inner: Arc<Inner<F, S>>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingUpdate>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<F: MarketFeed, S: SnapshotSource> OrderBookMaintainer<F, S> {
    /// Build the maintainer without starting anything
    pub fn new(config: &MaintainerConfig, feed: Arc<F>, source: Arc<S>, publisher: Option<IpcPublisher>) -> Self {
        let registry = Arc::new(SymbolRegistry::new());
        let dirty = Arc::new(DirtySet::new());
        let counters = Arc::new(MaintainerCounters::new());
        let shutdown = Flag::new();
        let loader = BaselineLoader::new(
            source,
            Arc::clone(&registry),
            Arc::clone(&dirty),
            Arc::clone(&counters),
            shutdown.clone(),
            config,
        );
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        for symbol in &config.symbols {
            registry.track(symbol);
        }

        Self {
            inner: Arc::new(Inner {
                id: config.id,
                default_depth: config.default_depth,
                telemetry_interval: config.telemetry_interval(),
                feed,
                loader,
                registry,
                dirty,
                watch: WatchSet::new(),
                counters,
                publisher,
                queue_tx,
                shutdown,
                paused: Flag::new(),
            }),
            queue_rx: Mutex::new(Some(queue_rx)),
            workers: AsyncMutex::new(Vec::new()),
        }
    }

    /// Build and boot: subscribe, load every baseline, then start the workers.
    /// Must be called from within a tokio runtime.
    pub async fn start(
        config: &MaintainerConfig,
        feed: Arc<F>,
        source: Arc<S>,
        publisher: Option<IpcPublisher>,
    ) -> Result<Self, MaintainerError> {
        let maintainer = Self::new(config, feed, source, publisher);
        maintainer.boot().await?;
        Ok(maintainer)
    }

    async fn boot(&self) -> Result<(), MaintainerError> {
        let inner = &self.inner;
        let symbols = inner.registry.symbols();

        info!(id = inner.id, symbols = ?symbols, "Initiated feed, now subscribing");
        inner.feed.subscribe(&topics_for(&symbols))?;

        let mut workers = self.workers.lock().await;
        workers.push(tokio::spawn(run_feed_pump(Arc::clone(inner))));

        try_join_all(symbols.iter().map(|s| inner.loader.refetch_snapshot(s))).await?;
        info!(id = inner.id, "Got all snapshots");

        if let Some(queue_rx) = self.queue_rx.lock().take() {
            workers.push(tokio::spawn(run_merge_worker(Arc::clone(inner), queue_rx)));
        }

        try_join_all(symbols.iter().map(|s| inner.loader.cache_price(s))).await?;
        for symbol in &symbols {
            inner.dirty.mark(symbol);
        }

        if inner.publisher.is_some() {
            workers.push(tokio::spawn(run_publisher(Arc::clone(inner))));
        }
        workers.push(tokio::spawn(run_telemetry(Arc::clone(inner))));

        info!(id = inner.id, "Booted up OB maintainer");
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Route one raw feed message as if it had come from the feed
    pub fn handle_message(&self, raw: &str) {
        self.inner.handle_message(raw);
    }

    /// Start tracking more symbols: subscribe their channels, then load their baselines
    pub async fn subscribe_to_market(&self, symbols: &[String]) -> Result<(), MaintainerError> {
        let inner = &self.inner;
        inner.feed.subscribe(&topics_for(symbols))?;
        for symbol in symbols {
            inner.registry.track(symbol);
        }

        try_join_all(symbols.iter().map(|s| inner.loader.refetch_snapshot(s))).await?;
        try_join_all(symbols.iter().map(|s| inner.loader.cache_price(s))).await?;
        info!(id = inner.id, symbols = ?symbols, "Subscribed to market");
        Ok(())
    }

    /// Stop tracking symbols. Local state goes even if the feed rejects the unsubscribe.
    pub fn unsubscribe_from_market(&self, symbols: &[String]) -> Result<(), MaintainerError> {
        let inner = &self.inner;
        let result = inner.feed.unsubscribe(&topics_for(symbols));
        for symbol in symbols {
            inner.registry.remove(symbol);
        }
        info!(id = inner.id, symbols = ?symbols, "Unsubscribed from market");
        result.map_err(MaintainerError::from)
    }

    pub fn add_update_subscribers(&self, symbols: &[String]) {
        self.inner.watch.add(symbols);
    }

    pub fn remove_update_subscribers(&self, symbols: &[String]) {
        self.inner.watch.remove(symbols);
    }

    /// Symbols whose changes are published
    pub fn update_subscribers(&self) -> HashSet<String> {
        self.inner.watch.snapshot()
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.inner.registry.symbols()
    }

    /// Best ask/bid, current price and last completed message rate
    pub fn get_all_for(&self, symbol: &str) -> Option<SymbolSummary> {
        let state = self.inner.registry.get_tracked(symbol)?;
        let state = state.lock();
        Some(SymbolSummary {
            symbol: symbol.to_string(),
            id: self.inner.id,
            curr_price: state.current_price.clone(),
            best_ask: state.book.best_ask(),
            best_bid: state.book.best_bid(),
            message_freq: state.last_known_frequency,
        })
    }

    /// Text depth view; `None` depth uses the configured default
    pub fn get_dets(&self, symbol: &str, depth: Option<usize>) -> Option<String> {
        let state = self.inner.registry.get_tracked(symbol)?;
        let state = state.lock();
        Some(state.book.render(depth.unwrap_or(self.inner.default_depth), &state.current_price))
    }

    /// Close the telemetry interval now instead of waiting for the next tick
    pub async fn report_telemetry(&self) -> Vec<TelemetryRecord> {
        self.inner.emit_telemetry().await
    }

    /// Stop merging and publishing; feed messages keep queueing
    pub fn pause(&self) {
        self.inner.paused.set(true);
        info!(id = self.inner.id, "Paused");
    }

    pub fn resume(&self) {
        self.inner.paused.set(false);
        info!(id = self.inner.id, "Resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.is_set()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_set()
    }

    /// Signal every worker and the feed, then wait for the workers to exit
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_set() {
            return;
        }
        self.inner.shutdown.set(true);
        self.inner.feed.shutdown();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(id = self.inner.id, error = %e, "Worker panicked");
            }
        }
        info!(id = self.inner.id, "Shutdown");
    }

    pub fn metrics(&self) -> MaintainerMetrics {
        let inner = &self.inner;
        inner.counters.snapshot(inner.registry.len(), inner.watch.snapshot().len(), inner.dirty.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BookSnapshot;
    use crate::layer1::rest_client::RestClientError;
    use crate::layer2::orderbook::BookChanges;
    use parking_lot::RwLock;

    #[derive(Default)]
    struct IdleFeed {
        topics: RwLock<Vec<String>>,
        shutting_down: RwLock<bool>,
    }

    impl MarketFeed for IdleFeed {
        fn subscribe(&self, topics: &[String]) -> Result<(), FeedError> {
            self.topics.write().extend(topics.iter().cloned());
            Ok(())
        }

        fn unsubscribe(&self, topics: &[String]) -> Result<(), FeedError> {
            self.topics.write().retain(|t| !topics.contains(t));
            Ok(())
        }

        async fn recv(&self) -> Option<FeedEvent> {
            std::future::pending().await
        }

        fn is_shutting_down(&self) -> bool {
            *self.shutting_down.read()
        }

        fn shutdown(&self) {
            *self.shutting_down.write() = true;
        }
    }

    struct FixedSource;

    impl SnapshotSource for FixedSource {
        async fn get_order_book(&self, _symbol: &str) -> Result<BookSnapshot, RestClientError> {
            Ok(BookSnapshot {
                sequence: "5".to_string(),
                asks: vec![["100.0".to_string(), "1".to_string()], ["101.0".to_string(), "2".to_string()]],
                bids: vec![["99.0".to_string(), "3".to_string()]],
            })
        }

        async fn get_last_trade_price(&self, _symbol: &str) -> Result<String, RestClientError> {
            Ok("99.5".to_string())
        }
    }

    fn maintainer(symbols: &[&str]) -> OrderBookMaintainer<IdleFeed, FixedSource> {
        let config = MaintainerConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            id: 3,
            ..Default::default()
        };
        OrderBookMaintainer::new(&config, Arc::new(IdleFeed::default()), Arc::new(FixedSource), None)
    }

    fn l2update(symbol: &str, asks: &str, bids: &str) -> String {
        format!(
            r#"{{"type":"message","topic":"/market/level2:{symbol}","subject":"trade.l2update","data":{{"symbol":"{symbol}","changes":{{"asks":{asks},"bids":{bids}}}}}}}"#
        )
    }

    fn l3match(symbol: &str, price: &str) -> String {
        format!(
            r#"{{"type":"message","topic":"/market/match:{symbol}","subject":"trade.l3match","data":{{"symbol":"{symbol}","price":"{price}"}}}}"#
        )
    }

    #[tokio::test]
    async fn test_start_loads_baselines_and_subscribes() {
        let config = MaintainerConfig { symbols: vec!["BTC-USDT".to_string()], ..Default::default() };
        let feed = Arc::new(IdleFeed::default());
        let obm = OrderBookMaintainer::start(&config, Arc::clone(&feed), Arc::new(FixedSource), None).await.unwrap();

        assert_eq!(feed.topics.read().len(), 3);
        let summary = obm.get_all_for("BTC-USDT").unwrap();
        assert_eq!(summary.curr_price, "99.5");
        assert_eq!(summary.best_ask.unwrap().price, 100.0);
        assert_eq!(summary.best_bid.unwrap().price, 99.0);

        obm.shutdown().await;
        assert!(feed.is_shutting_down());
        assert!(obm.is_shutting_down());
    }

    #[tokio::test]
    async fn test_depth_updates_are_counted_and_queued() {
        let obm = maintainer(&["BTC-USDT"]);
        obm.handle_message(&l2update("BTC-USDT", r#"[["99.5","3","6"]]"#, "[]"));
        obm.handle_message(&l2update("BTC-USDT", "[]", r#"[["98","1","7"]]"#));

        assert_eq!(obm.metrics().queue_depth, 2);
        assert_eq!(obm.metrics().feed_messages, 2);
        let records = obm.report_telemetry().await;
        assert_eq!(records, vec![TelemetryRecord { symbol: "BTC-USDT".to_string(), id: 3, freq: 2, retries: 0 }]);
    }

    #[tokio::test]
    async fn test_trade_match_marks_dirty_only_on_change() {
        let obm = maintainer(&["ETH-USDT"]);
        obm.handle_message(&l3match("ETH-USDT", "0"));
        assert!(!obm.inner.dirty.contains("ETH-USDT"));

        obm.handle_message(&l3match("ETH-USDT", "1850.25"));
        assert!(obm.inner.dirty.contains("ETH-USDT"));
        assert_eq!(obm.get_all_for("ETH-USDT").unwrap().curr_price, "1850.25");

        // Both trades counted
        assert_eq!(obm.report_telemetry().await[0].freq, 2);
        assert_eq!(obm.get_all_for("ETH-USDT").unwrap().message_freq, 2);
    }

    #[tokio::test]
    async fn test_depth_push_replaces_top_and_resets_sequence() {
        let obm = maintainer(&["BTC-USDT"]);
        let push = r#"{"type":"message","topic":"/spotMarket/level2Depth50:BTC-USDT","subject":"level2",
            "data":{"asks":[["100.5","4"]],"bids":[["99.5","1"]],"timestamp":1}}"#;
        obm.handle_message(push);

        let state = obm.inner.registry.get("BTC-USDT").unwrap();
        assert_eq!(state.lock().book.sequence(), 0);
        assert_eq!(state.lock().book.best_ask().unwrap().price, 100.5);
        assert!(obm.inner.dirty.contains("BTC-USDT"));
        // Depth pushes are not counted as messages
        assert_eq!(state.lock().message_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_unparseable_messages() {
        let obm = maintainer(&["BTC-USDT"]);
        obm.handle_message(r#"{"type":"welcome","id":"abc"}"#);
        obm.handle_message("{not json");
        obm.handle_message(&l3match("DOGE-USDT", "0.1"));

        assert!(obm.inner.registry.get("DOGE-USDT").is_none());
        assert_eq!(obm.metrics().parse_errors, 1);
        assert!(obm.inner.dirty.is_empty());
    }

    #[tokio::test]
    async fn test_merge_recreates_unknown_symbol_untracked() {
        let obm = maintainer(&[]);
        obm.inner.merge_update(&PendingUpdate {
            symbol: "XRP-USDT".to_string(),
            changes: BookChanges::from_triples(&[["0.5", "10", "1"]], &[]),
        });

        let state = obm.inner.registry.get("XRP-USDT").unwrap();
        assert_eq!(state.lock().book.best_ask().unwrap().price, 0.5);
        assert!(obm.inner.dirty.contains("XRP-USDT"));
        assert_eq!(obm.metrics().updates_merged, 1);

        assert!(obm.tracked_symbols().is_empty());
        assert!(obm.get_all_for("XRP-USDT").is_none());
        assert!(obm.report_telemetry().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribed_symbol_stays_out_of_telemetry() {
        let obm = maintainer(&["BTC-USDT", "ETH-USDT"]);
        obm.unsubscribe_from_market(&["BTC-USDT".to_string()]).unwrap();

        // Late feed data for the removed symbol
        obm.handle_message(&l2update("BTC-USDT", r#"[["99.5","3","6"]]"#, "[]"));
        assert_eq!(obm.metrics().queue_depth, 0);
        obm.inner.merge_update(&PendingUpdate {
            symbol: "BTC-USDT".to_string(),
            changes: BookChanges::from_triples(&[["99.5", "3", "6"]], &[]),
        });
        obm.handle_message(&l3match("BTC-USDT", "99.7"));

        let symbols: Vec<String> = obm.report_telemetry().await.into_iter().map(|r| r.symbol).collect();
        assert_eq!(symbols, vec!["ETH-USDT".to_string()]);
        assert_eq!(obm.tracked_symbols(), vec!["ETH-USDT".to_string()]);
        assert_eq!(obm.metrics().tracked_symbols, 1);

        // Subscribing again adopts the recreated book
        obm.subscribe_to_market(&["BTC-USDT".to_string()]).await.unwrap();
        assert_eq!(obm.tracked_symbols(), vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()]);
        assert_eq!(obm.get_all_for("BTC-USDT").unwrap().curr_price, "99.5");
    }

    #[tokio::test]
    async fn test_watch_set_management() {
        let obm = maintainer(&["BTC-USDT"]);
        obm.add_update_subscribers(&["BTC-USDT".to_string(), "ETH-USDT".to_string()]);
        obm.remove_update_subscribers(&["ETH-USDT".to_string()]);
        let watched = obm.update_subscribers();
        assert_eq!(watched.len(), 1);
        assert!(watched.contains("BTC-USDT"));
    }

    #[tokio::test]
    async fn test_get_dets_uses_default_depth() {
        let obm = maintainer(&["BTC-USDT"]);
        obm.inner.loader.refetch_snapshot("BTC-USDT").await.unwrap();

        let full = obm.get_dets("BTC-USDT", None).unwrap();
        assert!(full.contains("101"));
        let top = obm.get_dets("BTC-USDT", Some(1)).unwrap();
        assert!(!top.contains("101"));
        assert!(obm.get_dets("ETH-USDT", None).is_none());
    }

    #[test]
    fn test_error_sources_convert() {
        let config = MaintainerError::from(ConfigError::Validation("no symbols".to_string()));
        assert!(matches!(config, MaintainerError::Config(_)));
        assert_eq!(config.to_string(), "Configuration error: Validation error: no symbols");

        let feed = MaintainerError::from(FeedError::NotConnected);
        assert!(matches!(feed, MaintainerError::Feed(FeedError::NotConnected)));
        assert_eq!(MaintainerError::ShuttingDown.to_string(), "Maintainer is shutting down");
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let obm = maintainer(&["BTC-USDT"]);
        assert!(!obm.is_paused());
        obm.pause();
        assert!(obm.is_paused());
        obm.resume();
        assert!(!obm.is_paused());
    }
}
