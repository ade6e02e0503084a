// Collaborator seams for the maintainer
// The live KuCoin clients implement these; tests plug in in-process fakes.

use std::future::Future;
use thiserror::Error;

use crate::core::BookSnapshot;
use crate::layer1::rest_client::RestClientError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed not connected")]
    NotConnected,
    #[error("Feed command channel closed")]
    ChannelClosed,
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Events surfaced by a market-data feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Raw JSON text frame
    Message(String),
    /// The transport re-established its connection; book state may have gaps
    Reconnected,
}

/// Real-time market-data feed: topic subscription plus an event stream
pub trait MarketFeed: Send + Sync + 'static {
    fn subscribe(&self, topics: &[String]) -> Result<(), FeedError>;

    fn unsubscribe(&self, topics: &[String]) -> Result<(), FeedError>;

    /// Next feed event; `None` once the feed has terminated
    fn recv(&self) -> impl Future<Output = Option<FeedEvent>> + Send;

    /// True once the feed has begun shutting down
    fn is_shutting_down(&self) -> bool;

    fn shutdown(&self);
}

/// REST surface used for baseline state
pub trait SnapshotSource: Send + Sync + 'static {
    fn get_order_book(&self, symbol: &str) -> impl Future<Output = Result<BookSnapshot, RestClientError>> + Send;

    /// Most recent trade price, as the exchange's decimal string
    fn get_last_trade_price(&self, symbol: &str) -> impl Future<Output = Result<String, RestClientError>> + Send;
}
