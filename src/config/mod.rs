//! Configuration management for smart-cache
//!
//! Supports configuration via:
//! 1. Config file (~/.config/smart-cache/config.toml)
//! 2. Environment variables (SMART_CACHE_DURATION, SMART_CACHE_MAX_BLOCKS, etc.)
//! 3. CLI arguments (override file/env settings)
//!
//! Raw settings are checked once by [`Config::validate`]; the engine only
//! ever sees the resulting [`EngineConfig`].

use crate::analysis::TokenizerKind;
use crate::cache::{ReusePolicy, MAX_API_BREAKPOINTS, MAX_CACHE_DURATION, MIN_CACHE_TOKENS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache decision settings
    pub cache: CacheSettings,

    /// Cost model for savings estimates
    pub pricing: PricingSettings,

    /// Diagnostics
    pub logging: LoggingSettings,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Seconds a cache entry stays valid
    pub cache_duration: i64,

    /// New breakpoints allowed per request
    pub max_cache_blocks: i64,

    /// Minimum estimated tokens for a segment to be cacheable
    pub min_token_count: i64,

    /// Fingerprints tracked at once (0 = unbounded)
    pub max_entries: i64,

    /// Whether re-sent cached content uses a breakpoint
    pub reuse_policy: ReusePolicy,

    /// Token counting backend
    pub tokenizer: TokenizerKind,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_duration: 300,
            max_cache_blocks: MAX_API_BREAKPOINTS as i64,
            min_token_count: MIN_CACHE_TOKENS as i64,
            max_entries: 0,
            reuse_policy: ReusePolicy::Free,
            tokenizer: TokenizerKind::Heuristic,
        }
    }
}

/// Pricing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Fresh input price in USD per million tokens
    pub base_input_price_per_mtok: f64,

    /// Cache read price as a fraction of the base price
    pub cache_read_multiplier: f64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            base_input_price_per_mtok: 3.0,
            cache_read_multiplier: 0.1,
        }
    }
}

impl PricingSettings {
    /// USD saved each time one token is read from cache instead of resent
    pub fn savings_per_token(&self) -> f64 {
        self.base_input_price_per_mtok * (1.0 - self.cache_read_multiplier) / 1_000_000.0
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Emit per-request decision logs
    pub enable_logging: bool,

    /// trace, debug, info, warn or error
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enable_logging: true,
            log_level: "info".to_string(),
        }
    }
}

/// Validated settings the engine runs with
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_duration: Duration,
    pub max_cache_blocks: usize,
    pub min_token_count: usize,
    /// `None` = unbounded
    pub max_entries: Option<usize>,
    pub reuse_policy: ReusePolicy,
    pub tokenizer: TokenizerKind,
    pub savings_per_token: f64,
    pub enable_logging: bool,
    pub log_level: Level,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let pricing = PricingSettings::default();
        Self {
            cache_duration: Duration::from_secs(300),
            max_cache_blocks: MAX_API_BREAKPOINTS,
            min_token_count: MIN_CACHE_TOKENS,
            max_entries: None,
            reuse_policy: ReusePolicy::Free,
            tokenizer: TokenizerKind::Heuristic,
            savings_per_token: pricing.savings_per_token(),
            enable_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smart-cache")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path, using defaults if it does not exist
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        Self::load_required(&path)
    }

    /// Load config from a path that must exist
    pub fn load_required(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides; unparseable values are ignored
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_number("SMART_CACHE_DURATION") {
            self.cache.cache_duration = secs;
        }
        if let Some(blocks) = env_number("SMART_CACHE_MAX_BLOCKS") {
            self.cache.max_cache_blocks = blocks;
        }
        if let Some(tokens) = env_number("SMART_CACHE_MIN_TOKENS") {
            self.cache.min_token_count = tokens;
        }
        if let Ok(level) = std::env::var("SMART_CACHE_LOG_LEVEL") {
            self.logging.log_level = level;
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration into the settings the engine runs with
    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        let cache = &self.cache;

        if cache.max_cache_blocks <= 0 {
            return Err(ConfigError::invalid(
                "cache.max_cache_blocks",
                format!("must be at least 1, got {}", cache.max_cache_blocks),
            ));
        }
        if cache.max_cache_blocks > MAX_API_BREAKPOINTS as i64 {
            return Err(ConfigError::invalid(
                "cache.max_cache_blocks",
                format!(
                    "the API accepts at most {} breakpoints, got {}",
                    MAX_API_BREAKPOINTS, cache.max_cache_blocks
                ),
            ));
        }
        if cache.cache_duration < 0 {
            return Err(ConfigError::invalid(
                "cache.cache_duration",
                format!("must not be negative, got {}", cache.cache_duration),
            ));
        }
        if cache.cache_duration as u64 > MAX_CACHE_DURATION.as_secs() {
            return Err(ConfigError::invalid(
                "cache.cache_duration",
                format!(
                    "must not exceed {} seconds, got {}",
                    MAX_CACHE_DURATION.as_secs(),
                    cache.cache_duration
                ),
            ));
        }
        if cache.min_token_count < 0 {
            return Err(ConfigError::invalid(
                "cache.min_token_count",
                format!("must not be negative, got {}", cache.min_token_count),
            ));
        }
        if cache.max_entries < 0 {
            return Err(ConfigError::invalid(
                "cache.max_entries",
                format!("must not be negative, got {}", cache.max_entries),
            ));
        }

        let pricing = &self.pricing;
        let base_price = pricing.base_input_price_per_mtok;
        if !base_price.is_finite() || base_price < 0.0 {
            return Err(ConfigError::invalid(
                "pricing.base_input_price_per_mtok",
                format!("must be a non-negative number, got {}", base_price),
            ));
        }
        if !(0.0..=1.0).contains(&pricing.cache_read_multiplier) {
            return Err(ConfigError::invalid(
                "pricing.cache_read_multiplier",
                format!("must be between 0 and 1, got {}", pricing.cache_read_multiplier),
            ));
        }

        let log_level = self.logging.log_level.parse::<Level>().map_err(|_| {
            ConfigError::invalid(
                "logging.log_level",
                format!("unknown level '{}'", self.logging.log_level),
            )
        })?;

        Ok(EngineConfig {
            cache_duration: Duration::from_secs(cache.cache_duration as u64),
            max_cache_blocks: cache.max_cache_blocks as usize,
            min_token_count: cache.min_token_count as usize,
            max_entries: (cache.max_entries > 0).then_some(cache.max_entries as usize),
            reuse_policy: cache.reuse_policy,
            tokenizer: cache.tokenizer,
            savings_per_token: pricing.savings_per_token(),
            enable_logging: self.logging.enable_logging,
            log_level,
        })
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

fn env_number(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn cache_duration(mut self, secs: i64) -> Self {
        self.config.cache.cache_duration = secs;
        self
    }

    pub fn max_cache_blocks(mut self, blocks: i64) -> Self {
        self.config.cache.max_cache_blocks = blocks;
        self
    }

    pub fn min_token_count(mut self, tokens: i64) -> Self {
        self.config.cache.min_token_count = tokens;
        self
    }

    pub fn max_entries(mut self, entries: i64) -> Self {
        self.config.cache.max_entries = entries;
        self
    }

    pub fn reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.config.cache.reuse_policy = policy;
        self
    }

    pub fn tokenizer(mut self, tokenizer: TokenizerKind) -> Self {
        self.config.cache.tokenizer = tokenizer;
        self
    }

    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.logging.enable_logging = enabled;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.log_level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
