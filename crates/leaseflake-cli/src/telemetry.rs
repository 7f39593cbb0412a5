//! Structured logging for the CLI.
//!
//! Logs go to stderr so that generated IDs on stdout can be piped. Filtering
//! follows `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{
    EnvFilter, fmt, fmt::format::FmtSpan, fmt::time::ChronoLocal, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoLocal::rfc_3339())
        .pretty();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
