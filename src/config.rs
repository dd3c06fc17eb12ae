//! Configuration System using Figment
//!
//! Strongly-typed configuration for the link, the acquisition engine and the
//! per-channel display mappings. Configuration is loaded from:
//! 1. `config/adc_control.toml` (base configuration)
//! 2. Environment variables (prefixed with `ADC_CONTROL_`, nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use adc_control::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Port: {}", config.link.port);
//! # Ok::<(), adc_control::error::DaqError>(())
//! ```
//!
//! Channel mappings are stored as `key=value` text entries keyed by the hexadecimal
//! channel code, e.g. `"1A=Cell voltage"`, matching what the settings layer persists.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/adc_control.toml";

const MAPPING_DELIMITER: char = '=';

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Serial link settings
    #[serde(default)]
    pub link: LinkConfig,
    /// Acquisition and buffering settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Per-channel display mappings
    #[serde(default)]
    pub channels: ChannelConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3")
    #[serde(default)]
    pub port: String,
    /// Line speed in baud
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on each wait for a command's completion signature
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_ms: u64,
    /// Upper bound on the wait for the device's ready line
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// Depth of the event broadcast queue per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Moving-average window, in samples
    #[serde(default = "default_averaging_window")]
    pub averaging_window: usize,
    /// Initial per-channel series capacity for open-ended runs
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Run length sent to the device with the start command
    #[serde(default)]
    pub duration_secs: Option<u64>,
    /// Device sampling interval; sizes the series of timed runs
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_ms: u64,
}

/// Per-channel mappings, each entry `"<hex code>=<value>"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Display names
    #[serde(default)]
    pub names: Vec<String>,
    /// `true`/`false` visibility flags
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Plot colors, passed through untouched
    #[serde(default)]
    pub colors: Vec<String>,
    /// Math expressions over `x` (relative time) and `y` (moving average)
    #[serde(default)]
    pub expressions: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_baud_rate() -> u32 {
    115_200
}

fn default_completion_timeout() -> u64 {
    1000
}

fn default_connection_timeout() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_averaging_window() -> usize {
    1
}

fn default_initial_capacity() -> usize {
    1024
}

fn default_sampling_interval() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            completion_timeout_ms: default_completion_timeout(),
            connection_timeout_ms: default_connection_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            averaging_window: default_averaging_window(),
            initial_capacity: default_initial_capacity(),
            duration_secs: None,
            sampling_interval_ms: default_sampling_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LinkConfig {
    /// [`Self::completion_timeout_ms`] as a [`Duration`].
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    /// [`Self::connection_timeout_ms`] as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl AcquisitionConfig {
    /// Samples to reserve per channel.
    ///
    /// A timed run holds `duration / sampling interval` points, rounded up, so the
    /// series never has to grow. Open-ended runs start at `initial_capacity`.
    pub fn channel_capacity(&self) -> usize {
        match self.duration_secs {
            Some(secs) if self.sampling_interval_ms > 0 => {
                let samples = secs.saturating_mul(1000).div_ceil(self.sampling_interval_ms);
                usize::try_from(samples).unwrap_or(usize::MAX).max(1)
            }
            _ => self.initial_capacity.max(1),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables can override configuration with prefix `ADC_CONTROL_`.
    /// Example: `ADC_CONTROL_LINK__PORT=/dev/ttyACM1`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ADC_CONTROL_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.acquisition.averaging_window == 0 {
            return Err(DaqError::Configuration(
                "averaging_window must be at least 1".into(),
            ));
        }
        if self.acquisition.initial_capacity == 0 {
            return Err(DaqError::Configuration(
                "initial_capacity must be at least 1".into(),
            ));
        }
        if self.acquisition.sampling_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "sampling_interval_ms must be non-zero".into(),
            ));
        }
        if self.link.completion_timeout_ms == 0 || self.link.connection_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "link timeouts must be non-zero".into(),
            ));
        }
        if self.link.event_capacity == 0 {
            return Err(DaqError::Configuration(
                "event_capacity must be at least 1".into(),
            ));
        }

        // Surface malformed mappings at startup rather than at first telemetry line
        self.channel_mappings()?;
        Ok(())
    }

    /// Parse the `[channels]` section into typed lookup tables.
    pub fn channel_mappings(&self) -> AppResult<ChannelMappings> {
        let names = parse_mappings(&self.channels.names, |key, value| {
            Ok(value.unwrap_or(key).to_string())
        })?;
        let enabled = parse_mappings(&self.channels.enabled, |key, value| {
            let text = value.unwrap_or("true");
            text.trim().parse::<bool>().map_err(|_| {
                DaqError::Configuration(format!(
                    "Channel {key}: enabled flag '{text}' is not true/false"
                ))
            })
        })?;
        let colors = parse_mappings(&self.channels.colors, |key, value| {
            value.map(str::to_string).ok_or_else(|| {
                DaqError::Configuration(format!("Channel {key}: color mapping has no value"))
            })
        })?;
        let expressions = parse_mappings(&self.channels.expressions, |key, value| {
            value.map(str::to_string).ok_or_else(|| {
                DaqError::Configuration(format!("Channel {key}: expression mapping has no value"))
            })
        })?;

        Ok(ChannelMappings {
            names,
            enabled,
            colors,
            expressions,
        })
    }
}

/// Typed per-channel settings keyed by channel code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMappings {
    /// Display name by code.
    pub names: BTreeMap<u8, String>,
    /// Visibility by code.
    pub enabled: BTreeMap<u8, bool>,
    /// Plot color by code.
    pub colors: BTreeMap<u8, String>,
    /// Expression source by code; parsed by the registry.
    pub expressions: BTreeMap<u8, String>,
}

/// Split one `key=value` entry. The key is hexadecimal; a missing or empty value
/// yields `None`.
pub fn parse_mapping(entry: &str) -> AppResult<(u8, Option<&str>)> {
    let (key, value) = match entry.split_once(MAPPING_DELIMITER) {
        Some((key, value)) => (key, Some(value)),
        None => (entry, None),
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(DaqError::Configuration(format!(
            "Mapping '{entry}' has an empty channel code"
        )));
    }
    let code = u8::from_str_radix(key, 16).map_err(|e| {
        DaqError::Configuration(format!("Mapping '{entry}': bad channel code: {e}"))
    })?;
    Ok((code, value.filter(|v| !v.is_empty())))
}

/// Format one mapping entry the way [`parse_mapping`] reads it.
pub fn write_mapping(code: u8, value: &str) -> String {
    format!("{code:X}{MAPPING_DELIMITER}{value}")
}

fn parse_mappings<T>(
    entries: &[String],
    value_selector: impl for<'a> Fn(&'a str, Option<&'a str>) -> AppResult<T>,
) -> AppResult<BTreeMap<u8, T>> {
    let mut map = BTreeMap::new();
    for entry in entries {
        let (code, value) = parse_mapping(entry)?;
        let key = entry
            .split_once(MAPPING_DELIMITER)
            .map_or(entry.as_str(), |(k, _)| k)
            .trim();
        map.insert(code, value_selector(key, value)?);
    }
    Ok(map)
}
