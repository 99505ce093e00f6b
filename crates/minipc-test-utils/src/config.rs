//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use minipc_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .base_dir(dir.path())
///     .call_timeout_ms(200)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn base_dir(mut self, dir: &Path) -> Self {
        self.config.link.base_dir = dir.display().to_string();
        self
    }

    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.link.call_timeout_ms = ms;
        self
    }

    pub fn client_io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.link.client_io_timeout_ms = ms;
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.config.server.name = name.to_string();
        self
    }

    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.server.poll_timeout_ms = ms;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
