//! Tracing/logging initialization.
//!
//! Log lines must never go through the broker: they would queue behind the
//! very sessions they describe. The caller picks the writer, normally
//! stderr, which the subscriber writes to directly.

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Build the env-filter: `RUST_LOG` when set, otherwise `default_filter`.
fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber writing to stderr.
pub fn init_tracing(logging: &LoggingConfig) {
    init_tracing_with_writer(logging, std::io::stderr);
}

/// Initialise the global tracing subscriber with a custom writer.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing_with_writer<W>(logging: &LoggingConfig, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = env_filter(&logging.level);
    let result = if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
