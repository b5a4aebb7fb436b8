//! Log output for the binaries. Filtering follows `RUST_LOG`.

use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber writing plain (non-ANSI) log lines to stderr.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}
