//! Log capture for tests that do not use `#[test_log::test]`.
//!
//! [`TestSocketDir::new`](crate::socket::TestSocketDir::new) calls
//! [`init_test_tracing`], so fixtures built from plain `#[test]` functions,
//! doctests, or helper threads still route link events to the harness.

use tracing_subscriber::EnvFilter;

/// Install a process-wide `fmt` subscriber writing through the test writer.
///
/// `RUST_LOG` selects the filter; without it only warnings and errors are
/// shown. When a subscriber is already installed (for example by
/// `test_log`) this does nothing.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
