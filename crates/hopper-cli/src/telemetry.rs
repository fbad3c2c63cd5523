use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// - Debug builds: human-readable output
/// - Release builds: JSON lines
///
/// `RUST_LOG` controls the level, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}
