//! Configuration file support for sessionlens.
//!
//! Loads `sessionlens.toml` from the user config directory, or from an
//! explicit `--config` path.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sessionlens_logging::LogFormat;
use sessionlens_sessions::{PricingEntry, PricingTable};

/// The config file name
pub const CONFIG_FILE_NAME: &str = "sessionlens.toml";

const DEFAULT_LOG_LEVEL: &str = "warn";

/// Application configuration loaded from `sessionlens.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Root holding one directory per project (default `~/.claude/projects`)
    pub projects_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    /// `pretty`, `json` or `compact`
    pub log_format: Option<String>,
    /// Directory for the daily-rotated diagnostics log
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Per-model rates, keyed by exact model id
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    #[serde(default = "default_active_window", with = "humantime_serde")]
    pub active_window: Duration,
    #[serde(default = "default_peak_hours")]
    pub peak_hours: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            active_window: default_active_window(),
            peak_hours: default_peak_hours(),
        }
    }
}

/// Rates per 1000 tokens.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl From<PricingConfig> for PricingEntry {
    fn from(config: PricingConfig) -> Self {
        PricingEntry::new(
            config.input,
            config.output,
            config.cache_creation,
            config.cache_read,
        )
    }
}

fn default_debounce() -> Duration {
    sessionlens_sessions::watcher::DEFAULT_DEBOUNCE
}

fn default_active_window() -> Duration {
    Duration::from_secs(sessionlens_sessions::analytics::DEFAULT_ACTIVE_WINDOW_SECS as u64)
}

fn default_peak_hours() -> usize {
    sessionlens_sessions::analytics::DEFAULT_PEAK_HOURS
}

impl AppConfig {
    /// `<config dir>/sessionlens/sessionlens.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sessionlens").join(CONFIG_FILE_NAME))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and a missing file yields the defaults. A file that exists but
    /// fails to parse is always a hard error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::source_path(explicit) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// The file `load` reads: the explicit path, else the default location
    /// when it exists.
    pub fn source_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Parsed `log_format`, if set.
    pub fn log_format(&self) -> Result<Option<LogFormat>> {
        self.log_format
            .as_deref()
            .map(|s| s.parse::<LogFormat>().map_err(anyhow::Error::msg))
            .transpose()
    }

    /// Built-in pricing with the configured models layered on top.
    pub fn pricing_table(&self) -> PricingTable {
        let mut table = PricingTable::builtin();
        for (model, rates) in &self.pricing {
            table.insert(model.clone(), (*rates).into());
        }
        table
    }
}
