// Layer 1 - Connectors for KuCoin market data and local IPC

pub mod feed;
pub mod websocket;
pub mod rest_client;
pub mod ipc;

// Re-export commonly used items for convenience
pub use feed::{FeedError, FeedEvent, MarketFeed, SnapshotSource};
pub use websocket::{KucoinWebSocket, WebSocketStats};
pub use rest_client::{KucoinRestClient, RestClientError, RestClientStats, RateLimiter, WsToken};
pub use ipc::{IpcPublisher, IpcError};
