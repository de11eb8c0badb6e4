//! Configuration management
//!
//! All components receive their settings from a single `Config` constructed
//! at startup by the composition root. There is no ambient global state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lower bound for the tick interval in seconds (inclusive).
pub const MIN_FREQUENCY_SECS: u64 = 20;
/// Upper bound for the tick interval in seconds (exclusive).
pub const MAX_FREQUENCY_SECS: u64 = 3600;
/// Upper bound for the iteration count (exclusive).
pub const MAX_ITERATIONS: u32 = 1000;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Tick interval in seconds, in [20, 3600)
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,
    /// Number of measurements to run, in (0, 1000)
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// External measurement command, expected to print a JSON payload
    #[serde(default = "default_probe_command")]
    pub command: String,
    #[serde(default = "default_probe_args")]
    pub args: Vec<String>,
    /// Hard timeout for one probe invocation
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Hardware interface queried for the active wireless network name
    #[serde(default = "default_wifi_interface")]
    pub wifi_interface: String,
    /// Service names that are hardware interfaces rather than tunnels
    #[serde(default = "default_excluded_services")]
    pub excluded_services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Durable record log
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
    /// Read-only template used when the record log is absent or unreadable
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    /// Application log file, removed together with the records by erase-all
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_frequency_secs() -> u64 {
    20
}

fn default_iterations() -> u32 {
    10
}

fn default_probe_command() -> String {
    "speedtest-cli".to_string()
}

fn default_probe_args() -> Vec<String> {
    vec!["--json".to_string(), "--share".to_string()]
}

fn default_probe_timeout_secs() -> u64 {
    120
}

fn default_wifi_interface() -> String {
    "en0".to_string()
}

fn default_excluded_services() -> Vec<String> {
    vec![
        "USB 10/100/1000 LAN".to_string(),
        "Wi-Fi".to_string(),
        "iPhone USB".to_string(),
        "Thunderbolt Bridge".to_string(),
    ]
}

fn default_records_path() -> PathBuf {
    PathBuf::from("records.csv")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("speedlog.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency_secs: default_frequency_secs(),
            iterations: default_iterations(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: default_probe_command(),
            args: default_probe_args(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_interface: default_wifi_interface(),
            excluded_services: default_excluded_services(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            template_path: None,
            log_path: default_log_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {:?}: {e}",
                path.as_ref()
            ))
        })?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;

        validate_params(config.schedule.frequency_secs, config.schedule.iterations)?;

        Ok(config)
    }

    /// Load from `path` if it exists; otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Validate scheduling parameters against the configured bounds.
///
/// Rejection messages name the offending field so they can be surfaced
/// directly to the user.
pub fn validate_params(frequency_secs: u64, iterations: u32) -> Result<()> {
    if frequency_secs < MIN_FREQUENCY_SECS {
        return Err(Error::validation(
            "frequency",
            format!("must be at least {MIN_FREQUENCY_SECS} seconds"),
        ));
    }
    if frequency_secs >= MAX_FREQUENCY_SECS {
        return Err(Error::validation(
            "frequency",
            format!("must be less than {MAX_FREQUENCY_SECS} seconds"),
        ));
    }
    if iterations == 0 {
        return Err(Error::validation("iterations", "must be greater than 0"));
    }
    if iterations >= MAX_ITERATIONS {
        return Err(Error::validation(
            "iterations",
            format!("must be less than {MAX_ITERATIONS}"),
        ));
    }
    Ok(())
}
