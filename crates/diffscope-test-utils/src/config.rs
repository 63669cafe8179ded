//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries. Unlike `AppConfig::default()`
//! the builder starts with the index wait disabled, since a fake indexer
//! never reports background progress unless told to.

use std::time::Duration;

use diffscope_config::{AppConfig, IdentifierScope};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .request_timeout_secs(2)
///     .max_gap(3)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.indexing.wait = false;
        config.session.request_timeout_secs = 5;
        config.session.initialize_timeout_secs = 5;
        config.session.shutdown_grace_ms = 200;
        Self { config }
    }

    pub fn indexer_command(mut self, command: &str) -> Self {
        self.config.indexer.command = command.to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.session.request_timeout_secs = secs;
        self
    }

    /// Enable the index wait with short intervals suited to tests.
    pub fn index_wait(mut self, max_total: Duration) -> Self {
        self.config.indexing.wait = true;
        self.config.indexing.max_total_wait_secs = max_total.as_secs().max(1);
        self.config.indexing.max_stale_secs = self.config.indexing.max_total_wait_secs;
        self.config.indexing.initial_interval_ms = 10;
        self.config.indexing.max_interval_ms = 50;
        self
    }

    pub fn max_gap(mut self, gap: u32) -> Self {
        self.config.context.max_gap = gap;
        self
    }

    pub fn full_file(mut self) -> Self {
        self.config.context.identifier_scope = IdentifierScope::FullFile;
        self
    }

    pub fn fence_language(mut self, language: &str) -> Self {
        self.config.context.fence_language = language.to_string();
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
