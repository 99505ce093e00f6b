//! Per-test socket directories.
//!
//! Every test gets its own base directory so that parallel tests never see
//! each other's servers, and nothing is left under `/tmp/.minipc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use minipc_core::{Link, LinkOptions};
use tempfile::TempDir;

use crate::tracing_setup::init_test_tracing;

/// A temporary base directory plus matching [`LinkOptions`].
///
/// The directory and every socket in it are removed when this value is
/// dropped, even on panic.
pub struct TestSocketDir {
    options: LinkOptions,
    _temp_dir: TempDir,
}

impl TestSocketDir {
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create socket dir");
        let options = LinkOptions {
            base_dir: temp_dir.path().to_path_buf(),
            ..LinkOptions::default()
        };
        Self {
            options,
            _temp_dir: temp_dir,
        }
    }

    /// Options for links in this directory with a shorter call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.options.call_timeout = timeout;
        self
    }

    /// Bound on each server read or write of one client frame.
    pub fn with_client_io_timeout(mut self, timeout: Duration) -> Self {
        self.options.client_io_timeout = timeout;
        self
    }

    pub fn options(&self) -> LinkOptions {
        self.options.clone()
    }

    pub fn path(&self) -> &Path {
        &self.options.base_dir
    }

    /// Where the server called `name` would listen.
    pub fn socket(&self, name: &str) -> PathBuf {
        self.options.base_dir.join(name)
    }

    pub fn server(&self, name: &str) -> Link {
        Link::create_server_with(name, 0, self.options()).expect("failed to create test server")
    }

    pub fn client(&self, name: &str) -> Link {
        Link::create_client_with(name, 0, self.options()).expect("failed to connect test client")
    }
}

impl Default for TestSocketDir {
    fn default() -> Self {
        Self::new()
    }
}
