use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Level is controlled by
/// `RUST_LOG` (default `info`); falls back silently if a subscriber is
/// already installed (e.g. when called twice in tests).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
