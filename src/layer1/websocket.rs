// WebSocket Client - KuCoin public market-data feed
// Token handshake, topic subscriptions that survive reconnects, application-level pings

use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use futures::{StreamExt, SinkExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
// parking_lot::RwLock for state touched from sync trait methods,
// tokio Mutex for the receiver that is held across an await
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use std::fmt;
use tracing::{info, warn, error, debug};

use crate::core::{ConnectionStatus, KucoinConfig};
use crate::layer1::feed::{FeedError, FeedEvent, MarketFeed};
use crate::layer1::rest_client::KucoinRestClient;

/// Commands sent to the WebSocket event loop
#[derive(Debug)]
enum WsCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

/// Shared handles the connection task works on
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<ConnectionStatus>>,
    message_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    active_subscriptions: Arc<RwLock<HashSet<String>>>,
    next_request_id: Arc<AtomicU64>,
    shutting_down: Arc<AtomicBool>,
}

/// KuCoin WebSocket feed with dynamic subscription management
pub struct KucoinWebSocket {
    rest: Arc<KucoinRestClient>,
    shared: Shared,

    event_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<FeedEvent>>>,
    cmd_tx: RwLock<Option<mpsc::UnboundedSender<WsCommand>>>,

    // Used when the token response carries no ping interval
    fallback_ping_interval_secs: u64,
    stale_timeout_secs: u64,
    max_reconnect_attempts: u32,
    connection_wait_ms: u64,
}

impl KucoinWebSocket {
    pub fn new(rest: Arc<KucoinRestClient>, config: &KucoinConfig) -> Self {
        Self {
            rest,
            shared: Shared {
                state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
                message_count: Arc::new(AtomicU64::new(0)),
                error_count: Arc::new(AtomicU64::new(0)),
                active_subscriptions: Arc::new(RwLock::new(HashSet::new())),
                next_request_id: Arc::new(AtomicU64::new(1)),
                shutting_down: Arc::new(AtomicBool::new(false)),
            },
            event_rx: AsyncMutex::new(None),
            cmd_tx: RwLock::new(None),
            fallback_ping_interval_secs: config.ws_ping_interval_secs,
            stale_timeout_secs: config.ws_stale_timeout_secs,
            max_reconnect_attempts: config.max_reconnect_attempts,
            connection_wait_ms: config.ws_connection_wait_ms,
        }
    }

    /// Start the connection task. Must be called from within a tokio runtime.
    pub async fn connect(&self) -> Result<(), FeedError> {
        if self.cmd_tx.read().is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<FeedEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        *self.event_rx.lock().await = Some(event_rx);
        *self.cmd_tx.write() = Some(cmd_tx);

        *self.shared.state.write() = ConnectionStatus::Connecting;

        let rest = self.rest.clone();
        let shared = self.shared.clone();
        let settings = LoopSettings {
            fallback_ping_interval_secs: self.fallback_ping_interval_secs,
            stale_timeout_secs: self.stale_timeout_secs,
            max_reconnect_attempts: self.max_reconnect_attempts,
        };

        tokio::spawn(async move {
            let state = shared.state.clone();
            if let Err(e) = run_websocket(rest, shared, event_tx, cmd_rx, settings).await {
                error!(error = %e, "WebSocket fatal error");
                *state.write() = ConnectionStatus::Failed;
            }
        });

        tokio::time::sleep(Duration::from_millis(self.connection_wait_ms)).await;
        Ok(())
    }

    fn send_command(&self, cmd: WsCommand) -> Result<(), FeedError> {
        match self.cmd_tx.read().as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| FeedError::ChannelClosed),
            None => Err(FeedError::NotConnected),
        }
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.shared.active_subscriptions.read().iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.state.read() == ConnectionStatus::Connected
    }

    pub fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            state: *self.shared.state.read(),
            message_count: self.shared.message_count.load(Ordering::Relaxed),
            error_count: self.shared.error_count.load(Ordering::Relaxed),
            active_subscriptions: self.shared.active_subscriptions.read().len(),
        }
    }
}

impl MarketFeed for KucoinWebSocket {
    fn subscribe(&self, topics: &[String]) -> Result<(), FeedError> {
        {
            let mut subs = self.shared.active_subscriptions.write();
            for t in topics {
                subs.insert(t.clone());
            }
        }
        self.send_command(WsCommand::Subscribe(topics.to_vec()))
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), FeedError> {
        {
            let mut subs = self.shared.active_subscriptions.write();
            for t in topics {
                subs.remove(t);
            }
        }
        self.send_command(WsCommand::Unsubscribe(topics.to_vec()))
    }

    async fn recv(&self) -> Option<FeedEvent> {
        let mut rx_lock = self.event_rx.lock().await;
        match rx_lock.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down WebSocket feed");
        let _ = self.send_command(WsCommand::Shutdown);
    }
}

/// WebSocket statistics
#[derive(Debug, Clone)]
pub struct WebSocketStats {
    pub state: ConnectionStatus,
    pub message_count: u64,
    pub error_count: u64,
    pub active_subscriptions: usize,
}

impl fmt::Display for WebSocketStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WebSocketStats(state={:?}, messages={}, errors={}, subs={})",
               self.state, self.message_count, self.error_count, self.active_subscriptions)
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    fallback_ping_interval_secs: u64,
    stale_timeout_secs: u64,
    max_reconnect_attempts: u32,
}

/// How a single connection ended
enum ConnectionEnd {
    Closed,
    Shutdown,
}

/// Main WebSocket loop with automatic reconnection
async fn run_websocket(
    rest: Arc<KucoinRestClient>,
    shared: Shared,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    settings: LoopSettings,
) -> Result<(), FeedError> {
    let mut reconnect_attempt = 0u32;
    let mut connected_once = false;

    loop {
        if shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }

        let outcome = try_connect(
            &rest, &shared, &event_tx, &mut cmd_rx, settings, &mut connected_once,
        ).await;

        match outcome {
            Ok(ConnectionEnd::Shutdown) => {
                info!("WebSocket shut down");
                break;
            }
            Ok(ConnectionEnd::Closed) => {
                info!("WebSocket connection ended");
                reconnect_attempt = 0;
            }
            Err(e) => {
                error!(error = %e, "WebSocket connection error");
                shared.error_count.fetch_add(1, Ordering::Relaxed);
                *shared.state.write() = ConnectionStatus::Failed;
            }
        }

        if reconnect_attempt >= settings.max_reconnect_attempts {
            error!(max_attempts = settings.max_reconnect_attempts, "Max reconnection attempts reached");
            *shared.state.write() = ConnectionStatus::Failed;
            return Err(FeedError::WebSocket("max reconnection attempts reached".to_string()));
        }

        let delay_secs = std::cmp::min(2_u64.pow(reconnect_attempt), 60);
        reconnect_attempt += 1;

        warn!(delay_secs = delay_secs, attempt = reconnect_attempt, max = settings.max_reconnect_attempts, "Reconnecting");
        *shared.state.write() = ConnectionStatus::Reconnecting;
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
    }

    *shared.state.write() = ConnectionStatus::Disconnected;
    Ok(())
}

fn request_message(kind: &str, id: u64, topic: Option<&str>) -> String {
    match topic {
        Some(topic) => serde_json::json!({
            "id": id.to_string(),
            "type": kind,
            "topic": topic,
            "privateChannel": false,
            "response": true
        }),
        None => serde_json::json!({ "id": id.to_string(), "type": kind }),
    }
    .to_string()
}

/// Create a KuCoin subscribe message for one topic
pub fn create_subscribe_message(topic: &str, id: u64) -> String {
    request_message("subscribe", id, Some(topic))
}

/// Create a KuCoin unsubscribe message for one topic
pub fn create_unsubscribe_message(topic: &str, id: u64) -> String {
    request_message("unsubscribe", id, Some(topic))
}

/// Create a KuCoin ping message
pub fn create_ping_message(id: u64) -> String {
    request_message("ping", id, None)
}

/// Topics already subscribed on the current connection
#[derive(Debug, Default)]
struct SentTopics(HashSet<String>);

impl SentTopics {
    /// Topics not yet sent on this connection; they are recorded as sent
    fn unsent(&mut self, topics: &[String]) -> Vec<String> {
        topics.iter().filter(|t| self.0.insert((*t).clone())).cloned().collect()
    }

    fn forget(&mut self, topics: &[String]) {
        for topic in topics {
            self.0.remove(topic);
        }
    }
}

/// Single connection: handshake, subscribe all active topics, then pump frames and commands
async fn try_connect(
    rest: &KucoinRestClient,
    shared: &Shared,
    event_tx: &mpsc::UnboundedSender<FeedEvent>,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    settings: LoopSettings,
    connected_once: &mut bool,
) -> Result<ConnectionEnd, FeedError> {
    let token = rest
        .get_public_token()
        .await
        .map_err(|e| FeedError::Handshake(e.to_string()))?;
    let url = token.connect_url(&uuid::Uuid::new_v4().to_string());

    debug!(endpoint = %token.endpoint, "Connecting to WebSocket");
    *shared.state.write() = ConnectionStatus::Connecting;

    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| FeedError::WebSocket(e.to_string()))?;

    info!("WebSocket connected");
    *shared.state.write() = ConnectionStatus::Connected;

    let (mut write, mut read) = ws_stream.split();

    // Subscribes queued before the handshake are already covered by the active set
    let mut sent = SentTopics::default();
    let active: Vec<String> = shared.active_subscriptions.read().iter().cloned().collect();
    let topics = sent.unsent(&active);
    for topic in &topics {
        let id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        write
            .send(Message::Text(create_subscribe_message(topic, id)))
            .await
            .map_err(|e| FeedError::WebSocket(e.to_string()))?;
    }
    if !topics.is_empty() {
        info!(count = topics.len(), topics = ?topics, "Subscribed to topics");
    }

    if *connected_once {
        let _ = event_tx.send(FeedEvent::Reconnected);
    }
    *connected_once = true;

    let ping_secs = token
        .ping_interval_ms
        .map(|ms| (ms / 1000).max(1))
        .unwrap_or(settings.fallback_ping_interval_secs);
    let mut ping_interval = tokio::time::interval(Duration::from_secs(ping_secs));
    let mut last_message_time = Instant::now();
    let stale_timeout = Duration::from_secs(settings.stale_timeout_secs);

    loop {
        tokio::select! {
            msg_result = read.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        last_message_time = Instant::now();
                        let count = shared.message_count.fetch_add(1, Ordering::Relaxed) + 1;
                        let _ = event_tx.send(FeedEvent::Message(text));
                        if count % 10000 == 0 {
                            debug!(count = count, "WebSocket messages received");
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_message_time = Instant::now();
                        warn!(bytes = data.len(), "Received unexpected binary message");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_message_time = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_message_time = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by server");
                        *shared.state.write() = ConnectionStatus::Disconnected;
                        return Ok(ConnectionEnd::Closed);
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        *shared.state.write() = ConnectionStatus::Failed;
                        return Err(FeedError::WebSocket(e.to_string()));
                    }
                    None => {
                        info!("WebSocket stream ended");
                        *shared.state.write() = ConnectionStatus::Disconnected;
                        return Ok(ConnectionEnd::Closed);
                    }
                }
            }

            _ = ping_interval.tick() => {
                if last_message_time.elapsed() > stale_timeout {
                    warn!(elapsed_secs = ?last_message_time.elapsed(), "Stale connection detected");
                    *shared.state.write() = ConnectionStatus::Disconnected;
                    return Ok(ConnectionEnd::Closed);
                }
                let id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = write.send(Message::Text(create_ping_message(id))).await {
                    warn!(error = %e, "Ping failed");
                    return Err(FeedError::WebSocket(e.to_string()));
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Subscribe(topics)) => {
                        let topics = sent.unsent(&topics);
                        for topic in &topics {
                            let id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = write.send(Message::Text(create_subscribe_message(topic, id))).await {
                                error!(error = %e, topic = %topic, "Failed to send subscribe");
                            }
                        }
                        if !topics.is_empty() {
                            info!(topics = ?topics, "Subscribed");
                        }
                    }
                    Some(WsCommand::Unsubscribe(topics)) => {
                        sent.forget(&topics);
                        for topic in &topics {
                            let id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = write.send(Message::Text(create_unsubscribe_message(topic, id))).await {
                                error!(error = %e, topic = %topic, "Failed to send unsubscribe");
                            }
                        }
                        info!(topics = ?topics, "Unsubscribed");
                    }
                    Some(WsCommand::Shutdown) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        *shared.state.write() = ConnectionStatus::Disconnected;
                        return Ok(ConnectionEnd::Shutdown);
                    }
                }
            }
        }
    }
}
