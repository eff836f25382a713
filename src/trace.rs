//! Tracing setup for the bridge.
//!
//! Every dropped or malformed message produces a diagnostic event; the
//! control channels carry a handful of messages per second at most.

/// Initialize the tracing subscriber with timestamps.
///
/// Call this once at the start of the daemon or of a test binary. The
/// filter honours `RUST_LOG` and defaults to `cabridge=debug`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cabridge=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

pub(crate) use tracing::{debug, error, info, trace, warn};
