//! Tracing subscriber setup
//!
//! Console logging with an environment-driven filter. Set `RUST_LOG` to
//! override the default levels; set `CELLGRADER_LOG_JSON=1` for structured
//! JSON output when running behind a log collector.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,cellgrader=debug";

/// Initialize the tracing subsystem.
///
/// Safe to call once at process start; later calls would panic on
/// double-initialization, so the binary is the only caller.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("CELLGRADER_LOG_JSON").map(|v| v == "1").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    tracing::info!(filter = DEFAULT_FILTER, "Tracing initialized");
}
