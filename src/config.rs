//! Watcher configuration module.
//!
//! Handles loading, validating, and merging the `stamp-watch.toml` file.
//! Stock defaults are the base layer; the user file overrides any subset of
//! keys; command-line flags override both.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root = "state"                # Working root: repo/, thumbnails/, pages/
//! data_source = "https://github.com/gwisp2/russian-stamps.git"
//! data_source_branch = "main"
//! update_interval_secs = 1800   # Pause between update attempts
//! # frontend_dir = "frontend"   # Copied into every rebuilt output
//! # deploy_command = "rsync -a {pages}/ web:/srv/stamps"
//!
//! [availability]
//! disabled = false
//! ttl_secs = 604800             # Refresh at least this often
//! # scrape_command = "stamp-scraper"
//! timeout_secs = 300            # Per scraper call
//! max_attempts = 3              # Attempts per call when it times out
//! backoff_secs = 30             # Pause between attempts
//!
//! [availability.shop]
//! id = "rusmarka"
//! display_name = "rusmarka.ru"
//! link = "https://rusmarka.ru"
//!
//! [processing]
//! max_workers = 4               # Max parallel thumbnail workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::availability::ShopInfo;
use crate::deploy::DeployCommand;
use crate::scraper::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILENAME: &str = "stamp-watch.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Watcher configuration.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Directory holding all watcher state.
    pub root: PathBuf,
    /// Git URL of the data repository.
    pub data_source: String,
    pub data_source_branch: String,
    /// Seconds between update attempts after the first one.
    pub update_interval_secs: u64,
    /// Files copied into the root of every rebuilt output.
    pub frontend_dir: Option<PathBuf>,
    /// Shell command run after each rebuild; `{pages}` is the output directory.
    pub deploy_command: Option<String>,
    pub availability: AvailabilityConfig,
    pub processing: ProcessingConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("state"),
            data_source: "https://github.com/gwisp2/russian-stamps.git".to_string(),
            data_source_branch: "main".to_string(),
            update_interval_secs: 1800,
            frontend_dir: None,
            deploy_command: None,
            availability: AvailabilityConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_source.trim().is_empty() {
            return Err(ConfigError::Validation("data_source must not be empty".into()));
        }
        if self.data_source_branch.trim().is_empty() {
            return Err(ConfigError::Validation(
                "data_source_branch must not be empty".into(),
            ));
        }
        if self.update_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "update_interval_secs must be positive".into(),
            ));
        }
        if let Some(command) = &self.deploy_command {
            DeployCommand::parse(command)
                .map_err(|e| ConfigError::Validation(format!("deploy_command: {e}")))?;
        }
        self.availability.validate()?;
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Shop availability scraping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvailabilityConfig {
    /// Never scrape availability; rebuilds still happen for data changes.
    pub disabled: bool,
    /// Maximum age of a snapshot before it is refreshed.
    pub ttl_secs: u64,
    /// Program implementing the scraper protocol. Without it availability is
    /// not scraped.
    pub scrape_command: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub shop: ShopInfo,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            ttl_secs: 7 * 24 * 3600,
            scrape_command: None,
            timeout_secs: 300,
            max_attempts: 3,
            backoff_secs: 30,
            shop: ShopInfo::default(),
        }
    }
}

impl AvailabilityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "availability.ttl_secs must be positive".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "availability.timeout_secs must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "availability.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(command) = &self.scrape_command
            && command.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "availability.scrape_command must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel thumbnail workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(WatchConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<WatchConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: WatchConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<WatchConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# stamp-watch configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# The file is read from ./stamp-watch.toml unless --config points elsewhere.
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# Working root. Holds the data repository checkout (repo/), the thumbnail
# cache (thumbnails/), the assembled output (pages/) and availability.json.
root = "state"

# Git repository with stamps.json and images/, and the branch to follow.
data_source = "https://github.com/gwisp2/russian-stamps.git"
data_source_branch = "main"

# Seconds to wait between update attempts.
update_interval_secs = 1800

# Directory whose contents are copied into every rebuilt output.
# frontend_dir = "frontend"

# Shell command run after every rebuild. {pages} is replaced with the path
# of the assembled output directory.
# deploy_command = "rsync -a --delete {pages}/ web:/srv/stamps/"

# ---------------------------------------------------------------------------
# Shop availability
# ---------------------------------------------------------------------------
[availability]
# Never scrape availability. Data and thumbnail changes still trigger rebuilds.
disabled = false

# Refresh the snapshot when it is older than this many seconds, even if the
# catalog did not change.
ttl_secs = 604800

# Program implementing the scraper protocol (subcommands discover, page,
# categories, availability; JSON on stdout). Availability is not scraped
# without it.
# scrape_command = "stamp-scraper"

# Seconds a single scraper call may run before it is killed.
timeout_secs = 300

# Attempts per scraper call when it times out, and the pause between them.
max_attempts = 3
backoff_secs = 30

# How the shop appears in shops.json.
[availability.shop]
id = "rusmarka"
display_name = "rusmarka.ru"
link = "https://rusmarka.ru"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel thumbnail workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4
"##
}
