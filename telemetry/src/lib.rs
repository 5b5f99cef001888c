//! Tracing setup shared by the test suites and the task runner.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

static TEST_TRACING: Once = Once::new();

/// Installs a global subscriber that writes through the libtest capture.
///
/// Safe to call from every test: only the first call installs a subscriber, and an already
/// installed global subscriber is left in place.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let result = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer().with_target(true))
            .try_init();

        if result.is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

/// Installs the global subscriber for binaries.
///
/// # Panics
///
/// Panics if a global subscriber was already installed.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
