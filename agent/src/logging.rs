//! Diagnostic tracing for the agent.
//!
//! - **Tracing (this module)**: structured events filtered by `RUST_LOG`,
//!   written to stderr.
//! - **Cycle summaries (`cycle::CycleSummary`)**: the per-cycle product output.
//!   Logged at `info` and optionally printed to stdout as JSON lines.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line events.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=engage_agent=debug engage-agent run --once
/// ```
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}
