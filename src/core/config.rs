// Configuration Management for the KuCoin Order Book Maintainer
// JSON file + environment overrides, sectioned the same way the runtime consumes it

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KucoinConfig {
    // Credentials are carried for parity with private channels; public
    // market data never signs requests.
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,

    pub rest_base_url: String,
    pub request_timeout_seconds: u64,

    // WebSocket settings
    pub ws_ping_interval_secs: u64,
    pub ws_stale_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub ws_connection_wait_ms: u64,
}

impl Default for KucoinConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            rest_base_url: "https://api.kucoin.com".to_string(),
            request_timeout_seconds: 10,
            ws_ping_interval_secs: 18,
            ws_stale_timeout_secs: 60,
            max_reconnect_attempts: 10,
            ws_connection_wait_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintainerConfig {
    pub symbols: Vec<String>,
    pub id: u64,
    /// UNIX datagram socket path that receives change notifications and telemetry
    pub response_address: Option<String>,
    pub telemetry_interval_secs: u64,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub default_depth: usize,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC-USDT".to_string()],
            id: 0,
            response_address: None,
            telemetry_interval_secs: 60,
            retry_initial_backoff_ms: 250,
            retry_max_backoff_ms: 30_000,
            default_depth: 10,
        }
    }
}

impl MaintainerConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_format: bool,
    pub console_output: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_format: true,
            console_output: true,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub id: u64,
    pub symbols: Vec<String>,
    pub response_address: Option<String>,
    pub telemetry_interval_secs: u64,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    kucoin: Arc<RwLock<KucoinConfig>>,
    maintainer: Arc<RwLock<MaintainerConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            kucoin: Arc::new(RwLock::new(KucoinConfig::default())),
            maintainer: Arc::new(RwLock::new(MaintainerConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from a JSON file with `kucoin`, `maintainer` and `monitoring` sections
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        self.load_from_str(&content)?;

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    pub fn load_from_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;

        if let Some(data) = config_data.get("kucoin") {
            *self.kucoin.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("maintainer") {
            *self.maintainer.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value(data.clone())?;
        }
        Ok(())
    }

    /// Load credentials and deployment overrides from environment variables
    pub fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        {
            let mut kucoin = self.kucoin.write();
            if let Some(v) = lookup("KUCOIN_API_KEY") {
                kucoin.api_key = v;
            }
            if let Some(v) = lookup("KUCOIN_API_SECRET") {
                kucoin.api_secret = v;
            }
            if let Some(v) = lookup("KUCOIN_API_PASSPHRASE") {
                kucoin.api_passphrase = v;
            }
        }

        let mut maintainer = self.maintainer.write();
        if let Some(v) = lookup("OBM_SYMBOLS") {
            maintainer.symbols = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("OBM_ID") {
            match v.parse() {
                Ok(id) => maintainer.id = id,
                Err(_) => warn!(value = %v, "Ignoring non-numeric OBM_ID"),
            }
        }
        if let Some(v) = lookup("OBM_RESPONSE_ADDRESS") {
            maintainer.response_address = Some(v);
        }
        drop(maintainer);

        if let Some(v) = lookup("OBM_LOG_LEVEL") {
            self.monitoring.write().log_level = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let maintainer = self.maintainer.read();

        if maintainer.symbols.is_empty() {
            errors.push("at least one symbol must be tracked".to_string());
        }
        if maintainer.telemetry_interval_secs == 0 {
            errors.push("telemetry_interval_secs must be positive".to_string());
        }
        if maintainer.retry_initial_backoff_ms > maintainer.retry_max_backoff_ms {
            errors.push("retry_initial_backoff_ms must not exceed retry_max_backoff_ms".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    pub fn get_summary(&self) -> ConfigSummary {
        let maintainer = self.maintainer.read();
        let monitoring = self.monitoring.read();

        ConfigSummary {
            id: maintainer.id,
            symbols: maintainer.symbols.clone(),
            response_address: maintainer.response_address.clone(),
            telemetry_interval_secs: maintainer.telemetry_interval_secs,
            log_level: monitoring.log_level.clone(),
        }
    }

    pub fn kucoin(&self) -> KucoinConfig {
        self.kucoin.read().clone()
    }

    pub fn maintainer(&self) -> MaintainerConfig {
        self.maintainer.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }
}
