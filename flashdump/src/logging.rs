//! Logging initialization for the `flashdump` CLI.
//!
//! Diagnostics go through `tracing`. The default level is INFO (DEBUG with
//! `--verbose`, which also shows one line per dumped block) and can be
//! overridden with `RUST_LOG`.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = default_level.as_str().to_lowercase();
        EnvFilter::new(format!("flashdump={level},flashdump_core={level}"))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();
}
