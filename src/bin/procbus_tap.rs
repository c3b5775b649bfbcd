//! procbus-tap: Bus monitor
//!
//! Subscribes to the proxy's back URL and logs every message it sees.
//! Useful for debugging traffic between device processes.
//!
//! ## Usage
//! ```text
//! procbus-tap [--config <path>] [head/method ...]
//! ```
//!
//! With no topics, every known head is tapped. Payloads are logged as a
//! hex preview of at most `PREVIEW_BYTES` bytes.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use procbus::bus::topic::heads;
use procbus::bus::{BusMessage, SubEndpoint};
use procbus::config::Config;
use procbus::utils::bootstrap::{init_tracing, parse_config_path};

const PREVIEW_BYTES: usize = 32;

fn log_message(message: &BusMessage) -> procbus::bus::Result<()> {
    let payload = message.payload();
    let preview = &payload[..payload.len().min(PREVIEW_BYTES)];
    info!(
        topic = message.topic(),
        len = payload.len(),
        payload = %hex::encode(preview),
        "message"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let (config_path, topics) = parse_config_path(std::env::args().skip(1));
    let config = Config::load(config_path.as_deref())?;
    let (_, back) = config.proxy_dial_urls()?;

    let shutdown = CancellationToken::new();
    let mut sub = SubEndpoint::from_url(back).with_shutdown(&shutdown);
    sub.open()?;
    sub.dial_with_retry().await?;

    if topics.is_empty() {
        for head in heads::ALL {
            sub.subscribe_prefix(&format!("{head}/"));
        }
    } else {
        for topic in &topics {
            if !topic.contains('/') {
                warn!(topic = %topic, "Expected head/method, tapping as prefix");
            }
            sub.subscribe_prefix(topic);
        }
    }
    sub.arm(log_message)?;
    info!(url = %sub.url(), "procbus-tap started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
    }
    shutdown.cancel();

    let outcome = sub.stop().await?;
    info!(?outcome, "procbus-tap stopped");
    sub.close().await?;
    Ok(())
}
