//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Backend the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mock,
    Alpaca,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(BackendKind::Mock),
            "alpaca" => Ok(BackendKind::Alpaca),
            other => anyhow::bail!("Unknown backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Backend selection
    pub backend: BackendKind,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Search, stream and chart tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Alpaca-specific configuration
    #[serde(default)]
    pub alpaca: AlpacaConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period before a search is dispatched
    pub debounce_ms: u64,

    /// Upper bound for a single symbol lookup
    pub lookup_timeout_ms: u64,

    /// Upper bound for a stream start acknowledgment
    pub stream_start_timeout_ms: u64,

    /// Maximum number of candidates shown for a search
    pub max_candidates: usize,

    /// Maximum number of bars retained in the chart series
    pub max_bars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlpacaConfig {
    /// Trading REST API base URL
    pub trading_url: String,

    /// Market data WebSocket base URL
    pub stream_url: String,

    /// Market data feed (iex or sip)
    pub feed: String,

    /// API key id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key_id: String,

    /// API secret key
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_secret_key: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            log_level: "info".to_string(),
            log: LogConfig::default(),
            engine: EngineConfig::default(),
            alpaca: AlpacaConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            lookup_timeout_ms: 5_000,
            stream_start_timeout_ms: 10_000,
            max_candidates: 10,
            max_bars: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn stream_start_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_start_timeout_ms)
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            trading_url: "https://paper-api.alpaca.markets".to_string(),
            stream_url: "wss://stream.data.alpaca.markets".to_string(),
            feed: "iex".to_string(),
            api_key_id: String::new(),
            api_secret_key: String::new(),
            timeout_seconds: 10,
        }
    }
}

impl AlpacaConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key_id.trim().is_empty() && !self.api_secret_key.trim().is_empty()
    }

    /// Full market data stream URL for the configured feed
    pub fn stream_endpoint(&self) -> String {
        format!("{}/v2/{}", self.stream_url.trim_end_matches('/'), self.feed)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/marketview.log".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration for startup: a missing file means defaults, an unreadable or
    /// malformed one is an error. Validation is left to the caller so command line
    /// overrides can be applied first.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::from_env());
        }
        Self::read_from_file(path)
    }

    /// Defaults with environment variable overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // MARKETVIEW_BACKEND - mock or alpaca
        if let Ok(backend) = env::var("MARKETVIEW_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => tracing::warn!("Ignoring MARKETVIEW_BACKEND: {}", e),
            }
        }

        // MARKETVIEW_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("MARKETVIEW_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // MARKETVIEW_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("MARKETVIEW_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // Engine-specific environment variables
        // MARKETVIEW_DEBOUNCE_MS - search quiet period
        if let Ok(debounce) = env::var("MARKETVIEW_DEBOUNCE_MS") {
            if let Ok(value) = debounce.parse::<u64>() {
                self.engine.debounce_ms = value;
            }
        }

        // MARKETVIEW_STREAM_START_TIMEOUT_MS - stream acknowledgment bound
        if let Ok(timeout) = env::var("MARKETVIEW_STREAM_START_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.engine.stream_start_timeout_ms = value;
            }
        }

        // MARKETVIEW_MAX_BARS - chart retention
        if let Ok(max_bars) = env::var("MARKETVIEW_MAX_BARS") {
            if let Ok(value) = max_bars.parse::<usize>() {
                self.engine.max_bars = value;
            }
        }

        // Alpaca credentials use the variable names of the official SDKs
        if let Ok(key_id) = env::var("APCA_API_KEY_ID") {
            self.alpaca.api_key_id = key_id;
        }

        if let Ok(secret) = env::var("APCA_API_SECRET_KEY") {
            self.alpaca.api_secret_key = secret;
        }

        // MARKETVIEW_ALPACA_TRADING_URL - trading REST URL
        if let Ok(url) = env::var("MARKETVIEW_ALPACA_TRADING_URL") {
            self.alpaca.trading_url = url;
        }

        // MARKETVIEW_ALPACA_FEED - market data feed
        if let Ok(feed) = env::var("MARKETVIEW_ALPACA_FEED") {
            self.alpaca.feed = feed;
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(50..=2_000).contains(&self.engine.debounce_ms) {
            anyhow::bail!("engine.debounce_ms must be between 50 and 2000");
        }

        if self.engine.lookup_timeout_ms == 0 {
            anyhow::bail!("engine.lookup_timeout_ms must be greater than 0");
        }

        if self.engine.stream_start_timeout_ms == 0 {
            anyhow::bail!("engine.stream_start_timeout_ms must be greater than 0");
        }

        if self.engine.max_candidates == 0 {
            anyhow::bail!("engine.max_candidates must be greater than 0");
        }

        if self.engine.max_bars == 0 {
            anyhow::bail!("engine.max_bars must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if self.backend == BackendKind::Alpaca {
            if !self.alpaca.has_credentials() {
                anyhow::bail!(
                    "Alpaca backend requires APCA_API_KEY_ID and APCA_API_SECRET_KEY"
                );
            }

            if self.alpaca.timeout_seconds == 0 {
                anyhow::bail!("alpaca.timeout_seconds must be greater than 0");
            }
        }

        Ok(())
    }

    /// Normalize user-entered ticker text
    pub fn normalize_symbol(symbol: &str) -> String {
        symbol.trim().to_uppercase()
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        println!("Current configuration:");
        println!("{}", content);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  marketview config show    - Show current configuration");
        println!("  marketview config reset   - Write the default configuration");
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command<P: AsRef<Path>>(
        action: &Option<crate::cli::ConfigAction>,
        path: P,
    ) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load(&path)?;
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(&path)?;
                println!("Default configuration written to {}", path.as_ref().display());
                default_config.display()?;
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}
