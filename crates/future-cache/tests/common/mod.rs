use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Sets up the test environment.
///
/// Initializes a logger that captures all `future_cache` output through the
/// test runner; calling it more than once is harmless.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("future_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}
