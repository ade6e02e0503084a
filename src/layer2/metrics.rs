// Maintainer Metrics - counters shared by the workers, and a point-in-time view of them

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::layer1::websocket::WebSocketStats;

/// Live counters, bumped by the workers
#[derive(Debug, Default)]
pub struct MaintainerCounters {
    pub feed_messages: AtomicU64,
    pub parse_errors: AtomicU64,
    pub queue_depth: AtomicU64,
    pub updates_merged: AtomicU64,
    pub stale_dropped: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub notifications_published: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub snapshot_retries: AtomicU64,
    pub price_retries: AtomicU64,
    pub resyncs: AtomicU64,
}

impl MaintainerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Saturating decrement for gauges
    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn snapshot(&self, tracked_symbols: usize, watched_symbols: usize, dirty_symbols: usize) -> MaintainerMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MaintainerMetrics {
            tracked_symbols,
            watched_symbols,
            dirty_symbols,
            queue_depth: load(&self.queue_depth),
            feed_messages: load(&self.feed_messages),
            parse_errors: load(&self.parse_errors),
            updates_merged: load(&self.updates_merged),
            stale_dropped: load(&self.stale_dropped),
            malformed_dropped: load(&self.malformed_dropped),
            notifications_published: load(&self.notifications_published),
            notifications_failed: load(&self.notifications_failed),
            snapshot_retries: load(&self.snapshot_retries),
            price_retries: load(&self.price_retries),
            resyncs: load(&self.resyncs),
        }
    }
}

/// Metrics snapshot of one maintainer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintainerMetrics {
    pub tracked_symbols: usize,
    pub watched_symbols: usize,
    pub dirty_symbols: usize,
    pub queue_depth: u64,
    pub feed_messages: u64,
    pub parse_errors: u64,
    pub updates_merged: u64,
    pub stale_dropped: u64,
    pub malformed_dropped: u64,
    pub notifications_published: u64,
    pub notifications_failed: u64,
    pub snapshot_retries: u64,
    pub price_retries: u64,
    pub resyncs: u64,
}

impl MaintainerMetrics {
    pub fn total_retries(&self) -> u64 {
        self.snapshot_retries + self.price_retries
    }

    pub fn total_errors(&self) -> u64 {
        self.parse_errors + self.malformed_dropped + self.notifications_failed
    }

    /// Print detailed multi-line report
    pub fn print_report(&self, ws: Option<&WebSocketStats>) {
        info!("=== OB MAINTAINER METRICS ===");

        if let Some(ws) = ws {
            info!("  WebSocket:  msgs={} errs={} subs={} state={:?}",
                ws.message_count, ws.error_count, ws.active_subscriptions, ws.state);
        }

        info!("  Symbols:    tracked={} watched={} dirty={}",
            self.tracked_symbols, self.watched_symbols, self.dirty_symbols);
        info!("  Feed:       handled={} parse_errs={} resyncs={}",
            self.feed_messages, self.parse_errors, self.resyncs);
        info!("  Merge:      merged={} stale={} malformed={} queued={}",
            self.updates_merged, self.stale_dropped, self.malformed_dropped, self.queue_depth);
        info!("  Publish:    sent={} failed={}",
            self.notifications_published, self.notifications_failed);
        info!("  Retries:    snapshot={} price={}",
            self.snapshot_retries, self.price_retries);
    }

    /// Print compact single-line stats for periodic logging
    pub fn print_compact(&self, elapsed_secs: u64) {
        info!("[{:>3}s] syms={} | feed={} merged={} stale={} queued={} | sent={} | retries={} errs={}",
            elapsed_secs, self.tracked_symbols,
            self.feed_messages, self.updates_merged, self.stale_dropped, self.queue_depth,
            self.notifications_published,
            self.total_retries(), self.total_errors());
    }
}

impl fmt::Display for MaintainerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MaintainerMetrics(symbols={}, merged={}, published={}, errors={})",
            self.tracked_symbols,
            self.updates_merged,
            self.notifications_published,
            self.total_errors()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = MaintainerCounters::new();
        MaintainerCounters::incr(&counters.feed_messages);
        MaintainerCounters::add(&counters.updates_merged, 3);
        MaintainerCounters::incr(&counters.snapshot_retries);
        MaintainerCounters::incr(&counters.price_retries);
        MaintainerCounters::incr(&counters.parse_errors);

        let metrics = counters.snapshot(2, 1, 0);
        assert_eq!(metrics.tracked_symbols, 2);
        assert_eq!(metrics.feed_messages, 1);
        assert_eq!(metrics.updates_merged, 3);
        assert_eq!(metrics.total_retries(), 2);
        assert_eq!(metrics.total_errors(), 1);
    }

    #[test]
    fn test_gauge_does_not_underflow() {
        let counters = MaintainerCounters::new();
        MaintainerCounters::decr(&counters.queue_depth);
        assert_eq!(counters.snapshot(0, 0, 0).queue_depth, 0);

        MaintainerCounters::incr(&counters.queue_depth);
        MaintainerCounters::incr(&counters.queue_depth);
        MaintainerCounters::decr(&counters.queue_depth);
        assert_eq!(counters.snapshot(0, 0, 0).queue_depth, 1);
    }

    #[test]
    fn test_display() {
        let metrics = MaintainerMetrics { tracked_symbols: 3, updates_merged: 10, ..Default::default() };
        assert_eq!(
            metrics.to_string(),
            "MaintainerMetrics(symbols=3, merged=10, published=0, errors=0)"
        );
    }
}
