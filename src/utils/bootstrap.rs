//! Bootstrap utilities for procbus binaries.
//!
//! Shared initialization code for the proxy and the tap tool.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the PROCBUS_LOG environment variable.
///
/// Defaults to "info" level if PROCBUS_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Split `--config <path>` (or `-c <path>`) out of the arguments.
///
/// Returns the config path, if any, and the remaining arguments in order.
pub fn parse_config_path<I>(args: I) -> (Option<String>, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut rest = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            config = Some(path.to_string());
        } else if arg == "--config" || arg == "-c" {
            config = args.next();
        } else {
            rest.push(arg);
        }
    }
    (config, rest)
}
