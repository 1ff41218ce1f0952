pub mod catalog;
pub mod faulty;

pub use catalog::TestCatalog;
pub use faulty::FaultyStore;

use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test writer. Safe to call from every
/// test; only the first call installs the subscriber. `RUST_LOG` overrides
/// the default `warn` level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
