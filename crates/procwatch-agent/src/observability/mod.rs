//! Internal observability for the procwatch agent
//!
//! - Structured logging setup
//! - Loop health counters

mod metrics;

pub use metrics::*;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log filter for a given level
pub fn default_filter(level: &str) -> String {
    format!("procwatch_agent={},procwatch={}", level, level)
}

/// Install the global tracing subscriber
///
/// Logs go to stderr; stdout carries reports only. `RUST_LOG` overrides
/// the level-derived default.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
