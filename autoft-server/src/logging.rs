//! Tracing subscriber setup for the `autoft` binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "autoft=info,autoft_core=info";

/// Install the global subscriber. `verbose` raises our crates to `debug`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("autoft=debug,autoft_core=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(filter)
        .try_init();
}
