// REST Client for the KuCoin public market-data API
// Rate-limited HTTP client; retry policy lives with the callers that own the "never give up" contract

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use thiserror::Error;
use std::fmt;
use tracing::debug;

use crate::core::BookSnapshot;
use crate::layer1::feed::SnapshotSource;

const SUCCESS_CODE: &str = "200000";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing field in response: {0}")]
    MissingField(&'static str),
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket rate limiter for API requests.
/// Used behind `Arc<Mutex<RateLimiter>>`, so no internal lock.
pub struct RateLimiter {
    tokens: f64,
    pub max_tokens: f64,
    rate_per_sec: f64,
    last_update: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute as f64;
        Self {
            tokens: rpm,
            max_tokens: rpm,
            rate_per_sec: rpm / 60.0,
            last_update: now_secs(),
        }
    }

    /// Wait until a token is available (caller must hold the Mutex)
    pub async fn acquire(&mut self) {
        loop {
            self.add_tokens();

            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn add_tokens(&mut self) {
        let now = now_secs();
        let elapsed = now - self.last_update;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
        self.last_update = now;
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct RestClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub success_rate: f64,
}

impl fmt::Display for RestClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RestClientStats(sent={}, ok={}, fail={}, rate={:.2}%)",
            self.requests_sent, self.requests_succeeded, self.requests_failed,
            self.success_rate * 100.0
        )
    }
}

// ============================================================================
// Response payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawOrderBook {
    sequence: String,
    #[serde(default)]
    asks: Vec<[String; 2]>,
    #[serde(default)]
    bids: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstanceServer {
    endpoint: String,
    #[serde(default)]
    ping_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBullet {
    token: String,
    instance_servers: Vec<RawInstanceServer>,
}

/// Connection details for the public WebSocket feed
#[derive(Debug, Clone, PartialEq)]
pub struct WsToken {
    pub endpoint: String,
    pub token: String,
    pub ping_interval_ms: Option<u64>,
}

impl WsToken {
    pub fn connect_url(&self, connect_id: &str) -> String {
        format!("{}?token={}&connectId={}", self.endpoint, self.token, connect_id)
    }
}

/// Unwrap the KuCoin `{code, data, msg}` envelope
fn unwrap_envelope(body: Value) -> Result<Value, RestClientError> {
    let code = body.get("code").and_then(|c| c.as_str()).unwrap_or_default().to_string();
    if code != SUCCESS_CODE {
        let message = body
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(RestClientError::Api { code, message });
    }
    match body {
        Value::Object(mut map) => map.remove("data").ok_or(RestClientError::MissingField("data")),
        _ => Err(RestClientError::MissingField("data")),
    }
}

fn parse_order_book(data: Value) -> Result<BookSnapshot, RestClientError> {
    let raw: RawOrderBook = serde_json::from_value(data)?;
    Ok(BookSnapshot { sequence: raw.sequence, asks: raw.asks, bids: raw.bids })
}

/// The histories endpoint lists trades oldest first; the last entry is the latest price.
fn parse_last_trade_price(data: Value) -> Result<String, RestClientError> {
    let trades: Vec<RawTrade> = serde_json::from_value(data)?;
    trades
        .into_iter()
        .last()
        .map(|t| t.price)
        .ok_or(RestClientError::MissingField("data[-1].price"))
}

fn parse_bullet(data: Value) -> Result<WsToken, RestClientError> {
    let raw: RawBullet = serde_json::from_value(data)?;
    let server = raw
        .instance_servers
        .into_iter()
        .next()
        .ok_or(RestClientError::MissingField("instanceServers"))?;
    Ok(WsToken {
        endpoint: server.endpoint,
        token: raw.token,
        ping_interval_ms: server.ping_interval,
    })
}

// ============================================================================
// KuCoin REST Client
// ============================================================================

/// Public REST client for KuCoin spot market data
pub struct KucoinRestClient {
    base_url: String,
    client: Client,

    request_limiter: Arc<Mutex<RateLimiter>>,

    requests_sent: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
}

impl KucoinRestClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, RestClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            // KuCoin public endpoints allow well above this; stay conservative
            request_limiter: Arc::new(Mutex::new(RateLimiter::new(600))),
            requests_sent: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &crate::core::KucoinConfig) -> Result<Self, RestClientError> {
        Self::new(&config.rest_base_url, config.request_timeout_seconds)
    }

    async fn request(&self, method: &str, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, RestClientError> {
        self.request_limiter.lock().await.acquire().await;

        let url = format!("{}{}", self.base_url, endpoint);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        debug!(method = method, url = %url, "REST request");

        let result = async {
            let req = match method {
                "POST" => self.client.post(&url),
                _ => self.client.get(&url),
            };
            let response = req.query(query).send().await?;
            let status = response.status();
            let body: Value = response.json().await?;
            if status != StatusCode::OK && body.get("code").is_none() {
                return Err(RestClientError::Api {
                    code: status.as_u16().to_string(),
                    message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
                });
            }
            unwrap_envelope(body)
        }
        .await;

        match &result {
            Ok(_) => self.requests_succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.requests_failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Top-100 order book snapshot
    pub async fn get_order_book(&self, symbol: &str) -> Result<BookSnapshot, RestClientError> {
        let data = self
            .request("GET", "/api/v1/market/orderbook/level2_100", &[("symbol", symbol)])
            .await?;
        parse_order_book(data)
    }

    /// Latest trade price from the trade history
    pub async fn get_last_trade_price(&self, symbol: &str) -> Result<String, RestClientError> {
        let data = self.request("GET", "/api/v1/market/histories", &[("symbol", symbol)]).await?;
        parse_last_trade_price(data)
    }

    /// Public WebSocket connect token and endpoint
    pub async fn get_public_token(&self) -> Result<WsToken, RestClientError> {
        let data = self.request("POST", "/api/v1/bullet-public", &[]).await?;
        parse_bullet(data)
    }

    pub fn get_stats(&self) -> RestClientStats {
        let sent = self.requests_sent.load(Ordering::Relaxed);
        let succeeded = self.requests_succeeded.load(Ordering::Relaxed);

        RestClientStats {
            requests_sent: sent,
            requests_succeeded: succeeded,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            success_rate: if sent > 0 { succeeded as f64 / sent as f64 } else { 0.0 },
        }
    }
}

impl SnapshotSource for KucoinRestClient {
    async fn get_order_book(&self, symbol: &str) -> Result<BookSnapshot, RestClientError> {
        KucoinRestClient::get_order_book(self, symbol).await
    }

    async fn get_last_trade_price(&self, symbol: &str) -> Result<String, RestClientError> {
        KucoinRestClient::get_last_trade_price(self, symbol).await
    }
}
