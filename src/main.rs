// kucoin-obm daemon
// Usage: kucoin-obm [config.json]

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use kucoin_obm::core::{setup_logging, ConfigManager};
use kucoin_obm::layer1::{IpcPublisher, KucoinRestClient, KucoinWebSocket};
use kucoin_obm::layer2::{MaintainerError, OrderBookMaintainer};

const METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let config = ConfigManager::new(config_path.as_deref())?;

    let monitoring = config.monitoring();
    setup_logging(Some(&monitoring.log_level), Some(monitoring.json_format), Some(monitoring.console_output));
    config.validate().map_err(MaintainerError::from)?;

    let summary = config.get_summary();
    info!(id = summary.id, symbols = ?summary.symbols, response_address = ?summary.response_address, "Starting kucoin-obm");

    let kucoin = config.kucoin();
    let maintainer_config = config.maintainer();

    let rest = Arc::new(KucoinRestClient::from_config(&kucoin)?);
    let feed = Arc::new(KucoinWebSocket::new(Arc::clone(&rest), &kucoin));
    feed.connect().await?;

    let publisher = match &maintainer_config.response_address {
        Some(address) => Some(IpcPublisher::new(address)?),
        None => None,
    };

    let obm = OrderBookMaintainer::start(&maintainer_config, Arc::clone(&feed), rest, publisher).await?;
    // A standalone daemon publishes every symbol it tracks
    obm.add_update_subscribers(&maintainer_config.symbols);

    let started = Instant::now();
    let mut metrics_tick = tokio::time::interval(METRICS_INTERVAL);
    metrics_tick.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for ctrl-c");
                }
                break;
            }
            _ = metrics_tick.tick() => {
                obm.metrics().print_compact(started.elapsed().as_secs());
            }
        }
    }

    obm.metrics().print_report(Some(&feed.get_stats()));
    obm.shutdown().await;
    Ok(())
}
