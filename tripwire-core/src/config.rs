//! YAML configuration with serde defaults.
//!
//! Every field has a default, so an absent or empty config file yields a
//! fully usable configuration. Resolution order for the file path:
//!
//! 1. `TRIPWIRE_CONFIG` environment variable (must exist if set);
//! 2. `/etc/tripwire/config.yaml`;
//! 3. `./config.yaml`;
//! 4. built-in defaults.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzer::AnalyzerConfig;
use crate::analyzer::scoring::Boosts;
use crate::error::ConfigError;

/// Environment variable overriding the config file path.
pub const CONFIG_ENV: &str = "TRIPWIRE_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/tripwire/config.yaml";
const LOCAL_CONFIG_PATH: &str = "config.yaml";

/// Score thresholds, each in `[0,1]`, ordered `soft <= alert <= pause`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_soft")]
    pub soft: f64,
    #[serde(default = "default_alert")]
    pub alert: f64,
    #[serde(default = "default_pause")]
    pub pause: f64,
}

fn default_soft() -> f64 {
    0.3
}
fn default_alert() -> f64 {
    0.5
}
fn default_pause() -> f64 {
    0.6
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            soft: default_soft(),
            alert: default_alert(),
            pause: default_pause(),
        }
    }
}

/// An upstream provider the proxy forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the provider API key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_window_tokens")]
    pub window_tokens: u32,
    #[serde(default = "default_ewma_span_tokens")]
    pub ewma_span_tokens: u32,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub boosts: Boosts,
    /// Regex patterns that dampen the published score when matched.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_dampener")]
    pub dampener: f64,
}

fn default_window_tokens() -> u32 {
    256
}
fn default_ewma_span_tokens() -> u32 {
    1000
}
fn default_dampener() -> f64 {
    0.1
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            ewma_span_tokens: default_ewma_span_tokens(),
            thresholds: Thresholds::default(),
            boosts: Boosts::default(),
            allowlist: Vec::new(),
            dampener: default_dampener(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_storage_filename")]
    pub filename: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default)]
    pub privacy_mode: bool,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_storage_filename() -> String {
    "events.ndjson".to_string()
}
fn default_retention_days() -> u64 {
    7
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            filename: default_storage_filename(),
            retention_days: default_retention_days(),
            privacy_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-session ring buffer capacity, in events.
    #[serde(default = "default_ring_buffer")]
    pub ring_buffer: usize,
}

fn default_ring_buffer() -> usize {
    256
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ring_buffer: default_ring_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripwireConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl TripwireConfig {
    /// Parse and validate a config file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path (see module docs) and load it, falling back
    /// to defaults when no file is present.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            info!(path, "loading config from {CONFIG_ENV}");
            return Self::load_from_path(Path::new(&path));
        }
        for candidate in [SYSTEM_CONFIG_PATH, LOCAL_CONFIG_PATH] {
            let path = Path::new(candidate);
            if path.exists() {
                info!(path = candidate, "loading config");
                return Self::load_from_path(path);
            }
        }
        info!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Check cross-field invariants. Called automatically by the loaders.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.scoring.thresholds;
        for (name, value) in [("soft", t.soft), ("alert", t.alert), ("pause", t.pause)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "scoring.thresholds.{name} must be in [0,1], got {value}"
                )));
            }
        }
        if t.soft > t.alert || t.alert > t.pause {
            return Err(ConfigError::Invalid(format!(
                "thresholds must be ordered soft <= alert <= pause, got {} / {} / {}",
                t.soft, t.alert, t.pause
            )));
        }
        if !(0.0..=1.0).contains(&self.scoring.dampener) {
            return Err(ConfigError::Invalid(format!(
                "scoring.dampener must be in [0,1], got {}",
                self.scoring.dampener
            )));
        }
        if self.scoring.ewma_span_tokens == 0 {
            return Err(ConfigError::Invalid(
                "scoring.ewma_span_tokens must be at least 1".to_string(),
            ));
        }
        if self.bus.ring_buffer == 0 {
            return Err(ConfigError::Invalid(
                "bus.ring_buffer must be at least 1".to_string(),
            ));
        }
        self.compiled_allowlist()?;
        Ok(())
    }

    /// Compile the allowlist patterns.
    pub fn compiled_allowlist(&self) -> Result<Vec<Regex>, ConfigError> {
        self.scoring
            .allowlist
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    ConfigError::Invalid(format!("bad allowlist pattern {pattern:?}: {err}"))
                })
            })
            .collect()
    }

    /// Analyzer tuning derived from the scoring section.
    pub fn analyzer_config(&self) -> Result<AnalyzerConfig, ConfigError> {
        Ok(AnalyzerConfig {
            ewma_span_tokens: self.scoring.ewma_span_tokens,
            thresholds: self.scoring.thresholds,
            boosts: self.scoring.boosts,
            allowlist: self.compiled_allowlist()?,
            dampener: self.scoring.dampener,
        })
    }

    /// Path of the evidence log file.
    pub fn evidence_path(&self) -> PathBuf {
        self.storage.path.join(&self.storage.filename)
    }
}
