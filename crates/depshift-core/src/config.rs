use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::DepShiftError {
    fn from(err: ConfigError) -> Self {
        crate::DepShiftError::Config(err.to_string())
    }
}

/// Main configuration for depshift
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DepShiftConfig {
    /// Where versions, clients and dependencies come from
    #[serde(default)]
    pub source: SourceConfig,

    /// Throttling, retry and HTTP settings
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Code-model extraction front end
    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind: "remote" or "local"
    #[serde(default = "default_source_kind")]
    pub kind: String,

    /// Maven repository base URL
    #[serde(default = "default_repository_url")]
    pub repository_url: String,

    /// Usage-listing site base URL
    #[serde(default = "default_usage_url")]
    pub usage_url: String,

    /// Directory holding next_all.csv and links_all.csv
    #[serde(default = "default_local_dataset_dir")]
    pub local_dataset_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            repository_url: default_repository_url(),
            usage_url: default_usage_url(),
            local_dataset_dir: default_local_dataset_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Requests per second against the package repository
    #[serde(default = "default_qps")]
    pub repository_qps: u32,

    /// Requests per second against the usage-listing site
    #[serde(default = "default_qps")]
    pub scrape_qps: u32,

    /// Fixed wait between attempts after a transient failure
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Attempt cap; unset means retry until success
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            repository_qps: default_qps(),
            scrape_qps: default_qps(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_attempts: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Output and download root
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,

    /// Candidates downloaded or printed by default
    #[serde(default = "default_top_candidates")]
    pub top_candidates: usize,

    /// Client pairs diffed at the same time
    #[serde(default = "default_diff_concurrency")]
    pub diff_concurrency: usize,

    /// Minimum outgoing invocations for a caller of interest
    #[serde(default = "default_focus_threshold")]
    pub focus_threshold: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            top_candidates: default_top_candidates(),
            diff_concurrency: default_diff_concurrency(),
            focus_threshold: default_focus_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Extractor kind: "facts" or "command"
    #[serde(default = "default_extractor_kind")]
    pub kind: String,

    /// Front-end executable for the "command" kind
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed before the archive path
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: default_extractor_kind(),
            command: None,
            args: Vec::new(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
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
fn default_source_kind() -> String {
    "remote".to_string()
}
fn default_repository_url() -> String {
    "https://repo1.maven.org/maven2".to_string()
}
fn default_usage_url() -> String {
    "https://mvnrepository.com".to_string()
}
fn default_local_dataset_dir() -> PathBuf {
    PathBuf::from("dependency-graph")
}
fn default_qps() -> u32 {
    4
}
fn default_retry_backoff_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("depshift/{}", env!("CARGO_PKG_VERSION"))
}
fn default_dataset_path() -> PathBuf {
    PathBuf::from("dataset")
}
fn default_top_candidates() -> usize {
    5
}
fn default_diff_concurrency() -> usize {
    4
}
fn default_focus_threshold() -> usize {
    8
}
fn default_extractor_kind() -> String {
    "facts".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".depshift-cache")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager
pub struct ConfigManager {
    config: DepShiftConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (`explicit`, else .depshift.toml, else ~/.depshift/config.toml)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file(explicit)?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            source = %config.source.kind,
            extractor = %config.extractor.kind,
            dataset = %config.analysis.dataset_path.display(),
            "Configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Wraps an already built configuration; no files or environment are read.
    pub fn from_config(config: DepShiftConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".depshift.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .depshift.env: {}", e);
                }
            }
        }
    }

    fn load_config_file(
        explicit: Option<&Path>,
    ) -> Result<(DepShiftConfig, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            let config = Self::read_toml_file(path)?;
            return Ok((config, Some(path.to_path_buf())));
        }

        let local_config = Path::new(".depshift.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".depshift").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((DepShiftConfig::default(), None))
    }

    pub fn read_toml_file(path: &Path) -> Result<DepShiftConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: DepShiftConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Apply environment variable overrides read through `var`.
    ///
    /// Numeric values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides<F>(mut config: DepShiftConfig, var: F) -> DepShiftConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Option<T> {
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}={}: not a number", key, value);
                    None
                }
            }
        }

        // Source
        if let Some(kind) = var("DEPSHIFT_SOURCE") {
            config.source.kind = kind;
        }
        if let Some(url) = var("DEPSHIFT_REPOSITORY_URL") {
            config.source.repository_url = url;
        }
        if let Some(url) = var("DEPSHIFT_USAGE_URL") {
            config.source.usage_url = url;
        }
        if let Some(dir) = var("DEPSHIFT_LOCAL_DATASET") {
            config.source.local_dataset_dir = PathBuf::from(dir);
        }

        // Network
        if let Some(qps) = var("DEPSHIFT_REPOSITORY_QPS").and_then(|v| parsed::<u32>("DEPSHIFT_REPOSITORY_QPS", v)) {
            config.network.repository_qps = qps;
        }
        if let Some(qps) = var("DEPSHIFT_SCRAPE_QPS").and_then(|v| parsed::<u32>("DEPSHIFT_SCRAPE_QPS", v)) {
            config.network.scrape_qps = qps;
        }
        if let Some(secs) =
            var("DEPSHIFT_RETRY_BACKOFF_SECS").and_then(|v| parsed::<u64>("DEPSHIFT_RETRY_BACKOFF_SECS", v))
        {
            config.network.retry_backoff_secs = secs;
        }

        // Analysis
        if let Some(path) = var("DEPSHIFT_DATASET_PATH") {
            config.analysis.dataset_path = PathBuf::from(path);
        }
        if let Some(n) =
            var("DEPSHIFT_DIFF_CONCURRENCY").and_then(|v| parsed::<usize>("DEPSHIFT_DIFF_CONCURRENCY", v))
        {
            config.analysis.diff_concurrency = n;
        }

        // Extractor
        if let Some(kind) = var("DEPSHIFT_EXTRACTOR") {
            config.extractor.kind = kind;
        }
        if let Some(command) = var("DEPSHIFT_EXTRACTOR_COMMAND") {
            config.extractor.command = Some(command);
        }
        if let Some(dir) = var("DEPSHIFT_CACHE_DIR") {
            config.extractor.cache_dir = PathBuf::from(dir);
        }

        // Logging
        if let Some(level) = var("RUST_LOG") {
            config.logging.level = level;
        }

        config
    }

    pub fn validate_config(config: &DepShiftConfig) -> Result<(), ConfigError> {
        match config.source.kind.as_str() {
            "remote" | "local" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid source kind: {}. Must be one of: remote, local",
                    other
                )))
            }
        }

        match config.extractor.kind.as_str() {
            "facts" => {}
            "command" => {
                if config.extractor.command.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::ValidationError(
                        "extractor.command is required when extractor.kind = \"command\"".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid extractor kind: {}. Must be one of: facts, command",
                    other
                )))
            }
        }

        if config.network.repository_qps == 0 || config.network.scrape_qps == 0 {
            return Err(ConfigError::ValidationError(
                "repository_qps and scrape_qps must be greater than zero".to_string(),
            ));
        }
        if config.analysis.diff_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "diff_concurrency must be greater than zero".to_string(),
            ));
        }
        if config.network.max_attempts == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1 when set".to_string(),
            ));
        }

        // RUST_LOG may carry a full filter directive; only the plain forms are checked.
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level.to_ascii_lowercase().as_str() {
                "off" | "trace" | "debug" | "info" | "warn" | "error" => {}
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: off, trace, debug, info, warn, error",
                        level
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &DepShiftConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = DepShiftConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DepShiftConfig::default();
        assert_eq!(config.source.kind, "remote");
        assert_eq!(config.network.repository_qps, 4);
        assert_eq!(config.network.max_attempts, None);
        assert_eq!(config.analysis.top_candidates, 5);
        assert_eq!(config.analysis.focus_threshold, 8);
        assert_eq!(config.extractor.kind, "facts");
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = DepShiftConfig::default();

        let mut bad = config.clone();
        bad.source.kind = "ftp".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config.clone();
        bad.network.scrape_qps = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config.clone();
        bad.analysis.diff_concurrency = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config.clone();
        bad.extractor.kind = "command".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());
        bad.extractor.command = Some("m3-extract".to_string());
        assert!(ConfigManager::validate_config(&bad).is_ok());

        let mut bad = config.clone();
        bad.logging.format = "xml".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut directive = config;
        directive.logging.level = "depshift_core=debug,info".to_string();
        assert!(ConfigManager::validate_config(&directive).is_ok());
    }

    #[test]
    fn test_log_levels_match_env_filter_spelling() {
        for level in ["off", "OFF", "Info", "WARN", "trace"] {
            let env: HashMap<&str, &str> = HashMap::from([("RUST_LOG", level)]);
            let config = ConfigManager::apply_env_overrides(DepShiftConfig::default(), |key| {
                env.get(key).map(|v| v.to_string())
            });
            assert_eq!(config.logging.level, level);
            assert!(ConfigManager::validate_config(&config).is_ok(), "{}", level);
        }

        let mut bad = DepShiftConfig::default();
        bad.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DEPSHIFT_SOURCE", "local"),
            ("DEPSHIFT_LOCAL_DATASET", "/data/graph"),
            ("DEPSHIFT_SCRAPE_QPS", "2"),
            ("DEPSHIFT_DIFF_CONCURRENCY", "not-a-number"),
            ("DEPSHIFT_EXTRACTOR_COMMAND", "m3-extract"),
        ]);
        let config = ConfigManager::apply_env_overrides(DepShiftConfig::default(), |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.source.kind, "local");
        assert_eq!(config.source.local_dataset_dir, PathBuf::from("/data/graph"));
        assert_eq!(config.network.scrape_qps, 2);
        assert_eq!(config.analysis.diff_concurrency, 4);
        assert_eq!(config.extractor.command.as_deref(), Some("m3-extract"));
    }
}
