use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr so it never interleaves with the
/// rendered screen on stdout.
///
/// Without `debug` the level is pinned to `info`; with it, `RUST_LOG` may override the
/// default `debug` filter.
pub fn init(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
