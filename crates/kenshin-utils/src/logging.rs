//! Tracing setup for the stage binaries.
//!
//! Compact single-line output; `RUST_LOG` wins when set, otherwise
//! `--verbose` switches between the info and debug default filters.

use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Fails when a subscriber was already installed (e.g. double init in
/// the same process).
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("kenshin=debug,info")
            } else {
                EnvFilter::try_new("kenshin=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
