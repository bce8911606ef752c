//! Tracing setup for the `jh` binary.
//!
//! Log lines go to stderr so that `jh watch` can keep stdout for folder
//! JSON. `RUST_LOG` wins over the configured filter.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// With `verbose` the filter is widened to `debug` for this crate.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        format!("{},junit_harness=debug", config.filter)
    } else {
        config.filter.clone()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .try_init()?;

    Ok(())
}
