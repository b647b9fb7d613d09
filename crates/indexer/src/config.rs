//! Configuration management for the trust graph indexer.
//!
//! Configuration is read from a TOML file. Values may reference environment
//! variables as `${VAR_NAME}`; references inside comments are left alone.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Where accepted trust lines go
    pub sink: SinkConfig,

    /// Profile lookup configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ethereum RPC URL
    pub rpc_url: String,

    /// Chain ID (e.g., 100 for Gnosis)
    pub chain_id: u64,
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Hub contract emitting `Trust` events
    pub hub: Address,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://trustgraph.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First block to index (0 = from genesis)
    #[serde(default)]
    pub start_block: u64,

    /// Polling interval in seconds for new blocks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Number of blocks per historical batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Number of confirmations to wait before processing blocks
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// First delay after a failed sync iteration, in milliseconds (doubles per failure)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound for the retry delay, in seconds
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
}

impl SyncConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let base = Duration::from_millis(self.retry_base_ms);
        let cap = Duration::from_secs(self.retry_max_secs);
        base.saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)))
            .min(cap)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            confirmations: default_confirmations(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_secs: default_retry_max_secs(),
        }
    }
}

/// Sink adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append CSV rows to a local file
    File,
    /// Forward to a remote trust graph service
    Remote,
}

/// Sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Which adapter receives accepted trust lines
    pub kind: SinkKind,

    /// CSV file for the `file` sink
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Base URL of the remote service for the `remote` sink
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Shared secret sent as the `TCB-ID` header
    #[serde(default)]
    pub tcb_id: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transport errors and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Profile enrichment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Look up display names and avatars
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the profile service
    #[serde(default = "default_enrichment_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_enrichment_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_enrichment_base_url(),
            timeout_secs: default_enrichment_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_confirmations() -> u64 {
    2
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    5 // Gnosis block time
}

fn default_batch_size() -> u64 {
    1000
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_max_secs() -> u64 {
    60
}

fn default_sink_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_enrichment_base_url() -> String {
    "https://api.circles.garden".to_string()
}

fn default_enrichment_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR_NAME}` references.
    ///
    /// # Example
    /// ```no_run
    /// # use trustgraph_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        Self::from_toml_str(&expanded)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load configuration from a TOML string (no env expansion).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("Network RPC URL cannot be empty");
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }
        if self.contracts.hub.is_zero() {
            anyhow::bail!("Contracts hub must be a non-zero address");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.poll_interval_secs == 0 {
            anyhow::bail!("Sync poll_interval_secs must be > 0");
        }
        if self.sync.batch_size == 0 {
            anyhow::bail!("Sync batch_size must be > 0");
        }

        match self.sink.kind {
            SinkKind::File => {
                if self.sink.file_path.is_none() {
                    anyhow::bail!("Sink kind 'file' requires file_path");
                }
            }
            SinkKind::Remote => {
                let url = self.sink.remote_url.as_deref().unwrap_or_default();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("Sink kind 'remote' requires an http(s) remote_url");
                }
                if self.sink.tcb_id.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!("Sink kind 'remote' requires tcb_id");
                }
            }
        }
        if self.sink.timeout_secs == 0 {
            anyhow::bail!("Sink timeout_secs must be > 0");
        }

        if self.enrichment.enabled && self.enrichment.base_url.trim().is_empty() {
            anyhow::bail!("Enrichment base_url cannot be empty when enrichment is enabled");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Bare,
    Comment,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

/// Replace every `${VAR_NAME}` outside TOML comments with the variable's value.
///
/// Fails on unset variables, empty names and unclosed placeholders.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = Lexeme::Bare;
    let mut i = 0;

    let triple = |at: usize, quote: char| chars.get(at..at + 3) == Some(&[quote, quote, quote][..]);

    while i < chars.len() {
        let ch = chars[i];

        if ch == '\n' && state == Lexeme::Comment {
            state = Lexeme::Bare;
        }

        match (state, ch) {
            (Lexeme::Comment, _) => {}
            (Lexeme::Basic | Lexeme::MultiBasic, '\\') => {
                // Keep the escape and whatever it escapes.
                out.push(ch);
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                }
                i += 2;
                continue;
            }
            (_, '$') if chars.get(i + 1) == Some(&'{') => {
                let start = i + 2;
                let Some(len) = chars[start..].iter().position(|c| *c == '}') else {
                    anyhow::bail!("Unclosed environment variable placeholder at position {}", i);
                };
                let name: String = chars[start..start + len].iter().collect();
                if name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", i);
                }
                let value = std::env::var(&name).map_err(|_| {
                    anyhow::anyhow!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        name,
                        i
                    )
                })?;
                out.push_str(&value);
                i = start + len + 1;
                continue;
            }
            (Lexeme::Bare, '#') => state = Lexeme::Comment,
            (Lexeme::Bare, '"') if triple(i, '"') => {
                out.push_str("\"\"\"");
                state = Lexeme::MultiBasic;
                i += 3;
                continue;
            }
            (Lexeme::Bare, '\'') if triple(i, '\'') => {
                out.push_str("'''");
                state = Lexeme::MultiLiteral;
                i += 3;
                continue;
            }
            (Lexeme::MultiBasic, '"') if triple(i, '"') => {
                out.push_str("\"\"\"");
                state = Lexeme::Bare;
                i += 3;
                continue;
            }
            (Lexeme::MultiLiteral, '\'') if triple(i, '\'') => {
                out.push_str("'''");
                state = Lexeme::Bare;
                i += 3;
                continue;
            }
            (Lexeme::Bare, '"') => state = Lexeme::Basic,
            (Lexeme::Bare, '\'') => state = Lexeme::Literal,
            (Lexeme::Basic, '"') | (Lexeme::Literal, '\'') => state = Lexeme::Bare,
            _ => {}
        }

        out.push(ch);
        i += 1;
    }

    Ok(out)
}
