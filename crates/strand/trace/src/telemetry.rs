//! Logging initialization

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, TraceError};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer().with_target(config.with_target);
        subscriber.with(fmt_layer).try_init()
    };

    result.map_err(|e| TraceError::Subscriber(e.to_string()))
}
