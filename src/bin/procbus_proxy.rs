//! procbus-proxy: Bus forwarder
//!
//! Binds the front URL publishers dial and the back URL subscribers dial,
//! and forwards every frame from the front to all attached subscribers.
//!
//! ## Architecture
//! ```text
//! [hal pub] ---\                       /---> [main sub]
//! [media pub] ---> front [proxy] back -----> [lvgl sub]
//! [kvs pub] ---/                       \---> [hal sub]
//! ```
//!
//! ## Configuration
//! - `--config <path>`: YAML configuration file
//! - PROCBUS_CONFIG: configuration file path
//! - PROCBUS__BUS__TRANSPORT: `ipc` or `tcp`
//! - PROCBUS_LOG: tracing filter (default: info)

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use procbus::bus::BusProxy;
use procbus::config::Config;
use procbus::process::SingletonLock;
use procbus::utils::bootstrap::{init_tracing, parse_config_path};

const PROCESS_NAME: &str = "procbus-proxy";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let (config_path, _) = parse_config_path(std::env::args().skip(1));
    let config = Config::load(config_path.as_deref())?;

    let lock = SingletonLock::acquire(&config.process.lock_dir, PROCESS_NAME)?;
    info!(restart_count = lock.restart_count(), "Singleton lock held");

    let (front, back) = config.proxy_bind_urls()?;
    let proxy = BusProxy::bind(&front, &back).await?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    token.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
            }
        });
    }

    info!(front = %front, back = %back, "procbus-proxy started");
    proxy.run(token).await?;
    info!("procbus-proxy stopped");

    drop(lock);
    Ok(())
}
