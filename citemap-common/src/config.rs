//! Configuration loading and cache folder resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line arguments (applied by the binary on top of the loaded file)
//! 2. Environment variables (`CITEMAP_CONFIG`, `CITEMAP_CACHE_FOLDER`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing TOML file is never fatal: a warning is logged and defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_ENV_VAR: &str = "CITEMAP_CONFIG";

/// Environment variable overriding the cache folder
pub const CACHE_FOLDER_ENV_VAR: &str = "CITEMAP_CACHE_FOLDER";

/// Affiliation resolution policy, selected once per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliationPolicy {
    /// Free-text affiliation with role/filler stripping (recall first)
    #[default]
    Aggressive,
    /// Verified organization only (precision first)
    Conservative,
}

impl AffiliationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliationPolicy::Aggressive => "aggressive",
            AffiliationPolicy::Conservative => "conservative",
        }
    }
}

impl fmt::Display for AffiliationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AffiliationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(AffiliationPolicy::Aggressive),
            "conservative" => Ok(AffiliationPolicy::Conservative),
            other => Err(Error::Config(format!(
                "Unknown affiliation policy '{}' (expected 'aggressive' or 'conservative')",
                other
            ))),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding per-identifier harvest caches
    ///
    /// If not specified, falls back to environment → OS cache directory
    #[serde(default)]
    pub cache_folder: Option<PathBuf>,

    /// Disable the harvest cache entirely (forces a fresh crawl)
    #[serde(default)]
    pub disable_cache: bool,

    #[serde(default)]
    pub affiliation_policy: AffiliationPolicy,

    /// Concurrent harvesting workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Route upstream requests through a proxy
    #[serde(default)]
    pub use_network_proxy: bool,

    /// Explicit proxy URL; system proxy environment is used when absent
    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub harvest: HarvestSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub geocode: GeocodeSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            cache_folder: None,
            disable_cache: false,
            affiliation_policy: AffiliationPolicy::default(),
            worker_count: default_worker_count(),
            use_network_proxy: false,
            proxy_url: None,
            harvest: HarvestSettings::default(),
            retry: RetrySettings::default(),
            geocode: GeocodeSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    16
}

/// Upstream scholarly source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Consecutive `Blocked` results that abort the harvesting stage
    pub block_abort_threshold: usize,
    /// Minimum spacing between any two upstream requests (process-wide)
    pub min_request_interval_ms: u64,
    /// Ceiling for the adaptive spacing after repeated blocks
    pub max_request_interval_ms: u64,
    /// Random extra spacing added to every grant
    pub jitter_ms: u64,
    /// Pages of citing works fetched per cites id (10 results per page)
    pub max_citation_pages: usize,
    /// Pages of the subject profile fetched (100 publications per page)
    pub max_profile_pages: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:52.0) Gecko/20100101 Firefox/52.0"
                .to_string(),
            request_timeout_secs: 30,
            block_abort_threshold: 5,
            min_request_interval_ms: 1000,
            max_request_interval_ms: 60_000,
            jitter_ms: 4000,
            max_citation_pages: 100,
            max_profile_pages: 10,
        }
    }
}

/// Retry policy applied to every single network call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of each delay randomised (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

/// Geocoding backend and candidate-variant policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeSettings {
    pub endpoint: String,
    pub user_agent: String,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    /// Persist the per-variant cache next to the harvest caches
    pub persist_cache: bool,
    /// Try the text after "at" / "@" as its own variant
    pub split_on_at: bool,
    /// Segment delimiters for progressive shortening
    pub delimiters: Vec<String>,
    /// Try suffixes obtained by dropping leading segments
    pub drop_leading_segments: bool,
    pub max_variants: usize,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "citation_mapper".to_string(),
            requests_per_second: 1,
            request_timeout_secs: 30,
            max_attempts: 3,
            persist_cache: true,
            split_on_at: true,
            delimiters: vec![",".to_string(), "，".to_string(), ";".to_string()],
            drop_leading_segments: true,
            max_variants: 6,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
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

impl TomlConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.harvest.block_abort_threshold == 0 {
            return Err(Error::Config(
                "harvest.block_abort_threshold must be at least 1".to_string(),
            ));
        }
        if self.harvest.min_request_interval_ms > self.harvest.max_request_interval_ms {
            return Err(Error::Config(format!(
                "harvest.min_request_interval_ms ({}) exceeds max_request_interval_ms ({})",
                self.harvest.min_request_interval_ms, self.harvest.max_request_interval_ms
            )));
        }
        if self.retry.max_attempts == 0 || self.geocode.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config("retry.jitter must be within 0.0 - 1.0".to_string()));
        }
        if self.geocode.requests_per_second == 0 {
            return Err(Error::Config(
                "geocode.requests_per_second must be at least 1".to_string(),
            ));
        }
        if self.geocode.max_variants == 0 {
            return Err(Error::Config("geocode.max_variants must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Locate the TOML config file
///
/// Priority: explicit path → `CITEMAP_CONFIG` → `<config dir>/citemap/citemap.toml`
/// (only if it exists). `None` means "run on defaults".
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("citemap").join("citemap.toml"))
        .filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Load the config file if one is found, otherwise fall back to defaults
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a config file atomically
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    write_atomic(path, content.as_bytes())
}

/// Resolve the harvest cache folder
///
/// Priority: CLI → `CITEMAP_CACHE_FOLDER` → TOML → OS cache directory
pub fn resolve_cache_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CACHE_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_cache_folder()
}

/// OS-dependent default cache folder
pub fn default_cache_folder() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("citemap"))
        .unwrap_or_else(|| PathBuf::from("./cache"))
}

/// Write `bytes` to `path` via a sibling temp file + rename
///
/// Parent directories are created as needed. Readers never observe a
/// half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Io(e));
    }
    Ok(())
}
