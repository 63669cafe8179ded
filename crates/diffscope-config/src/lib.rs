#![deny(unsafe_code)]

//! Configuration loading and validation for diffscope.
//!
//! Loads TOML configuration files and validates them against expected ranges.
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup that drives a local `clangd`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How the indexer process is launched.
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Protocol session timeouts and stderr handling.
    #[serde(default)]
    pub session: SessionConfig,

    /// Background-index convergence wait.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Identifier scanning and excerpt rendering.
    #[serde(default)]
    pub context: ContextConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Indexer launch configuration.
///
/// ## TOML Example
///
/// ```toml
/// [indexer]
/// command = "clangd"
/// args = ["--header-insertion=never", "--background-index", "--log=error"]
/// compile_commands_dir = "/work/build"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Indexer executable. May also be a container runtime wrapping the indexer.
    #[serde(default = "default_indexer_command")]
    pub command: String,

    /// Arguments passed to the indexer.
    #[serde(default = "default_indexer_args")]
    pub args: Vec<String>,

    /// Directory holding `compile_commands.json`, passed as
    /// `--compile-commands-dir=<dir>` when set.
    #[serde(default)]
    pub compile_commands_dir: Option<PathBuf>,

    /// Working directory of the indexer. Defaults to the codebase root.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            command: default_indexer_command(),
            args: default_indexer_args(),
            compile_commands_dir: None,
            working_dir: None,
        }
    }
}

fn default_indexer_command() -> String {
    "clangd".to_string()
}

fn default_indexer_args() -> Vec<String> {
    ["--header-insertion=never", "--background-index", "--log=error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Protocol session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound for a single request/response exchange, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for the `initialize` handshake, in seconds.
    #[serde(default = "default_initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,

    /// Time the indexer gets to exit on shutdown before it is killed.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Number of indexer stderr lines kept for error reports.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,

    /// Optional file receiving the full indexer stderr stream.
    #[serde(default)]
    pub stderr_log: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            initialize_timeout_secs: default_initialize_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stderr_tail_lines: default_stderr_tail_lines(),
            stderr_log: None,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_secs(self.initialize_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_initialize_timeout_secs() -> u64 {
    60
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_stderr_tail_lines() -> usize {
    200
}

/// Background indexing wait configuration.
///
/// The wait is best-effort: when the budget runs out, resolution proceeds
/// with whatever the indexer knows at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Whether to wait for background indexing before resolving.
    #[serde(default = "default_indexing_wait")]
    pub wait: bool,

    /// Total wait budget in seconds.
    #[serde(default = "default_max_total_wait_secs")]
    pub max_total_wait_secs: u64,

    /// Give up when progress has not changed for this many seconds.
    #[serde(default = "default_max_stale_secs")]
    pub max_stale_secs: u64,

    /// First backoff interval in milliseconds.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            wait: default_indexing_wait(),
            max_total_wait_secs: default_max_total_wait_secs(),
            max_stale_secs: default_max_stale_secs(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl IndexingConfig {
    pub fn max_total_wait(&self) -> Duration {
        Duration::from_secs(self.max_total_wait_secs)
    }

    pub fn max_stale_time(&self) -> Duration {
        Duration::from_secs(self.max_stale_secs)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

fn default_indexing_wait() -> bool {
    true
}

fn default_max_total_wait_secs() -> u64 {
    600
}

fn default_max_stale_secs() -> u64 {
    60
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    10_000
}

/// Which source lines are scanned for identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentifierScope {
    /// Only lines added by the diff.
    #[default]
    AddedLines,
    /// Every line of each changed file, in addition to the added lines.
    FullFile,
}

/// Context extraction and rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Largest gap between essential lines that is filled instead of elided.
    #[serde(default = "default_max_gap")]
    pub max_gap: u32,

    /// Identifier scanning scope.
    #[serde(default)]
    pub identifier_scope: IdentifierScope,

    /// `languageId` sent with `textDocument/didOpen`.
    #[serde(default = "default_language_id")]
    pub language_id: String,

    /// Info string of the fenced code blocks in the bundle.
    #[serde(default = "default_fence_language")]
    pub fence_language: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_gap: default_max_gap(),
            identifier_scope: IdentifierScope::default(),
            language_id: default_language_id(),
            fence_language: default_fence_language(),
        }
    }
}

fn default_max_gap() -> u32 {
    5
}

fn default_language_id() -> String {
    "c".to_string()
}

fn default_fence_language() -> String {
    "c".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexer.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "indexer.command must not be empty".to_string(),
            ));
        }
        if self.indexer.args.iter().any(|a| a.is_empty()) {
            return Err(ConfigError::Validation(
                "indexer.args must not contain empty arguments".to_string(),
            ));
        }

        if self.session.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.request_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.session.initialize_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.initialize_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.session.stderr_tail_lines == 0 {
            return Err(ConfigError::Validation(
                "session.stderr_tail_lines must be at least 1".to_string(),
            ));
        }

        if self.indexing.initial_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "indexing.initial_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.indexing.max_interval_ms < self.indexing.initial_interval_ms {
            return Err(ConfigError::Validation(format!(
                "indexing.max_interval_ms ({}) must not be below indexing.initial_interval_ms ({})",
                self.indexing.max_interval_ms, self.indexing.initial_interval_ms
            )));
        }
        if self.indexing.max_stale_secs > self.indexing.max_total_wait_secs {
            return Err(ConfigError::Validation(format!(
                "indexing.max_stale_secs ({}) must not exceed indexing.max_total_wait_secs ({})",
                self.indexing.max_stale_secs, self.indexing.max_total_wait_secs
            )));
        }

        if self.context.language_id.is_empty() {
            return Err(ConfigError::Validation(
                "context.language_id must not be empty".to_string(),
            ));
        }
        if self
            .context
            .fence_language
            .chars()
            .any(|c| c.is_whitespace() || c == '`')
        {
            return Err(ConfigError::Validation(format!(
                "context.fence_language must be a single word, got {:?}",
                self.context.fence_language
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
