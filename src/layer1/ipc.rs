// IPC egress - UNIX datagram notifications to a local consumer
// Two payloads: bare symbol names for book changes, JSON records for telemetry

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::UnixDatagram;
use tracing::debug;

use crate::core::TelemetryRecord;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unbound datagram socket that sends to one configured destination
pub struct IpcPublisher {
    socket: UnixDatagram,
    address: PathBuf,
    datagrams_sent: AtomicU64,
}

impl IpcPublisher {
    /// Must be called from within a tokio runtime
    pub fn new(address: impl AsRef<Path>) -> Result<Self, IpcError> {
        Ok(Self {
            socket: UnixDatagram::unbound()?,
            address: address.as_ref().to_path_buf(),
            datagrams_sent: AtomicU64::new(0),
        })
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    async fn send(&self, payload: &[u8]) -> Result<(), IpcError> {
        self.socket.send_to(payload, &self.address).await?;
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Change notification: the symbol name as raw bytes
    pub async fn send_symbol(&self, symbol: &str) -> Result<(), IpcError> {
        debug!(symbol = symbol, "Publishing book change");
        self.send(symbol.as_bytes()).await
    }

    /// Telemetry: `{"symbol", "id", "freq"}` as JSON
    pub async fn send_telemetry(&self, record: &TelemetryRecord) -> Result<(), IpcError> {
        let payload = serde_json::to_vec(record)?;
        self.send(&payload).await
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_path() -> PathBuf {
        std::env::temp_dir().join(format!("obm-ipc-{}.sock", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_send_symbol_and_telemetry() {
        let path = socket_path();
        let receiver = UnixDatagram::bind(&path).unwrap();
        let publisher = IpcPublisher::new(&path).unwrap();

        publisher.send_symbol("BTC-USDT").await.unwrap();
        let mut buf = [0u8; 256];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"BTC-USDT");

        let record = TelemetryRecord { symbol: "BTC-USDT".to_string(), id: 1, freq: 10, retries: 0 };
        publisher.send_telemetry(&record).await.unwrap();
        let n = receiver.recv(&mut buf).await.unwrap();
        let decoded: TelemetryRecord = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(publisher.datagrams_sent(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_send_without_listener_fails() {
        let publisher = IpcPublisher::new(socket_path()).unwrap();
        assert!(publisher.send_symbol("BTC-USDT").await.is_err());
        assert_eq!(publisher.datagrams_sent(), 0);
    }
}
