//! Stream Configuration
//!
//! Centralized configuration for the streaming core, loaded from
//! `~/.config/inbox-stream/config.toml`.
//!
//! # Layering
//!
//! Each setting comes from the first layer that sets it:
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`INBOX_STREAM_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example `config.toml`
//!
//! ```toml
//! [stream]
//! flush_interval_ms = 50
//! stall_timeout_secs = 120
//!
//! [reconcile]
//! clear_delay_ms = 2000
//! refetch_delay_ms = 1000
//! reasoning_ledger_capacity = 5
//!
//! [node]
//! address = "http://localhost:9850"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default node address when none is configured
pub const DEFAULT_NODE_ADDRESS: &str = "http://localhost:9850";

// =============================================================================
// Error Types
// =============================================================================

/// Config loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Cannot read config file {path}: {source}")]
    ReadError {
        /// File that failed
        path: PathBuf,
        /// IO failure
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Malformed config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value outside its allowed range
    #[error("Invalid stream configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Provenance
// =============================================================================

/// Which layer last changed the configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line flag
    Cli,
    /// `INBOX_STREAM_*` variable
    Env,
    /// `config.toml`
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// On-disk Format
// =============================================================================

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Token buffer flush cadence in milliseconds
    pub flush_interval_ms: Option<u64>,

    /// Inactivity timeout for a running turn in seconds (0 = disabled)
    pub stall_timeout_secs: Option<u64>,
}

/// Reconcile section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileToml {
    /// Delay before ephemeral state is cleared after the durable write
    pub clear_delay_ms: Option<u64>,

    /// Delay before the cache is refetched when tools created files
    pub refetch_delay_ms: Option<u64>,

    /// How many conversations keep their last reasoning duration
    pub reasoning_ledger_capacity: Option<usize>,
}

/// Node section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeToml {
    /// HTTP address of the node API
    pub address: Option<String>,
}

/// Shape of `config.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfigToml {
    /// Stream section
    pub stream: StreamToml,

    /// Reconcile section
    pub reconcile: ReconcileToml,

    /// Node section
    pub node: NodeToml,
}

// =============================================================================
// StreamConfig
// =============================================================================

/// Timing and capacity settings for the streaming pipeline
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Token buffer flush cadence (~20 Hz by default)
    pub flush_interval: Duration,

    /// Delay between the durable write and `clear_inbox`
    pub clear_delay: Duration,

    /// Delay before refetching a turn whose tools created files
    pub refetch_delay: Duration,

    /// Reasoning duration ledger capacity
    pub reasoning_ledger_capacity: usize,

    /// Force-finalise a running turn after this much silence (`None` = never)
    pub stall_timeout: Option<Duration>,

    /// HTTP address of the node API
    pub node_address: String,

    /// File the values were read from, when one existed
    pub config_file_path: Option<PathBuf>,

    /// Layer a setting was taken from
    source: ConfigSource,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            clear_delay: Duration::from_millis(2000),
            refetch_delay: Duration::from_millis(1000),
            reasoning_ledger_capacity: 5,
            stall_timeout: Some(Duration::from_secs(120)),
            node_address: DEFAULT_NODE_ADDRESS.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StreamConfig {
    /// Defaults only, no file or environment applied
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority layer that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Record the layer that produced the current values
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would break the pipeline's timing guarantees
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero flush interval or a
    /// zero-capacity ledger.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "flush interval must be greater than zero".to_string(),
            ));
        }
        if self.reasoning_ledger_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "reasoning ledger capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn stall_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// `$XDG_CONFIG_HOME/inbox-stream/config.toml`, when a config dir exists
///
/// Returns `$XDG_CONFIG_HOME/inbox-stream/config.toml` or
/// `~/.config/inbox-stream/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("inbox-stream").join("config.toml"))
}

/// Defaults, then the default config file, then the environment
///
/// # Errors
///
/// Returns `ConfigError` when the file exists but cannot be read or parsed.
/// A missing file leaves the defaults in place.
pub fn load_config() -> Result<StreamConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Defaults, then `path` (if it exists), then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting configuration fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StreamConfig, ConfigError> {
    load_config_with_env(path, &|key| std::env::var(key).ok())
}

/// Load configuration reading environment overrides through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<StreamConfig, ConfigError> {
    let mut config = StreamConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: StreamConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Stream config file applied"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "No config file, keeping defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Copy the settings present in the file over the defaults
fn apply_toml_config(config: &mut StreamConfig, toml: &StreamConfigToml) {
    if let Some(ms) = toml.stream.flush_interval_ms {
        config.flush_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.stream.stall_timeout_secs {
        config.stall_timeout = stall_timeout_from_secs(secs);
    }

    if let Some(ms) = toml.reconcile.clear_delay_ms {
        config.clear_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reconcile.refetch_delay_ms {
        config.refetch_delay = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.reconcile.reasoning_ledger_capacity {
        config.reasoning_ledger_capacity = capacity;
    }

    if let Some(ref address) = toml.node.address {
        config.node_address = address.clone();
    }
}

/// Layer `INBOX_STREAM_*` variables on top
fn apply_env_config(config: &mut StreamConfig, env: &dyn Fn(&str) -> Option<String>) {
    if let Some(ms) = env("INBOX_STREAM_FLUSH_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.flush_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("INBOX_STREAM_STALL_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
    {
        config.stall_timeout = stall_timeout_from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("INBOX_STREAM_CLEAR_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.clear_delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("INBOX_STREAM_REFETCH_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.refetch_delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(address) = env("INBOX_STREAM_NODE_ADDRESS") {
        config.node_address = address;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied last
///
/// Built by the binary from its flags and applied after [`load_config`].
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,

    /// Stall timeout override (seconds, 0 disables)
    pub stall_timeout_secs: Option<u64>,

    /// Node address override
    pub node_address: Option<String>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Set stall timeout override
    #[must_use]
    pub fn with_stall_timeout_secs(mut self, secs: u64) -> Self {
        self.stall_timeout_secs = Some(secs);
        self
    }

    /// Set node address override
    #[must_use]
    pub fn with_node_address(mut self, address: String) -> Self {
        self.node_address = Some(address);
        self
    }

    /// Overwrite the settings that were given on the command line
    pub fn apply(&self, config: &mut StreamConfig) {
        if self.flush_interval_ms.is_some()
            || self.stall_timeout_secs.is_some()
            || self.node_address.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.stall_timeout_secs {
            config.stall_timeout = stall_timeout_from_secs(secs);
        }
        if let Some(ref address) = self.node_address {
            config.node_address = address.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
