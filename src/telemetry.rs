use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber, writing to stderr and filtered by
/// `RUST_LOG` (default `info`). Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
