//! TOML configuration
//!
//! Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [keys]
//! dir = "keys"
//! bits = 2048
//!
//! [alerts]
//! cooldown_seconds = 300
//! queue_size = 100
//! channel_capacity = 64
//! command = ["/usr/local/bin/page-nurse", "--ward", "3"]
//!
//! [thresholds.heart_rate]
//! low = 50.0
//! high = 110.0
//! ```

use crate::alerts::{
    CommandNotifier, LogNotifier, Notifier, DEFAULT_COOLDOWN_SECONDS, DEFAULT_RETRY_QUEUE_SIZE,
};
use crate::error::ConfigError;
use crate::metrics::{Metric, ThresholdRange};
use crate::paillier::{DEFAULT_KEY_BITS, MIN_KEY_BITS};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Default capacity of the channel between ingestion and alert delivery
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub keys: KeysConfig,
    pub alerts: AlertsConfig,
    /// Per-metric overrides of the default normal range, keyed by wire name
    pub thresholds: BTreeMap<String, ThresholdRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory holding `pubkey.json` and `privkey.json`
    pub dir: PathBuf,
    /// Modulus size used by `keygen`
    pub bits: u64,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("keys"),
            bits: DEFAULT_KEY_BITS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_seconds: u64,
    /// Failed alerts kept for retry
    pub queue_size: usize,
    /// Alerts buffered between ingestion and the dispatcher thread
    pub channel_capacity: usize,
    /// External notifier: program followed by its arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS as u64,
            queue_size: DEFAULT_RETRY_QUEUE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            command: None,
        }
    }
}

impl Config {
    /// Read and validate a configuration file
    ///
    /// # Errors
    ///
    /// * `ConfigError::ReadError` - the file is missing or unreadable
    /// * `ConfigError::TomlError` - the file is not valid TOML for this schema
    /// * `ConfigError::ValidationError` - a value is out of range
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration for the binary
    ///
    /// Without a path, or when the file does not exist, the defaults are used.
    /// A file that exists but is invalid is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No configuration file given, using defaults");
            return Ok(Config::default());
        };

        info!("Loading configuration from: {}", path.display());
        match Self::from_file(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::ReadError(_)) if !path.exists() => {
                warn!(
                    "Configuration file '{}' not found, using defaults",
                    path.display()
                );
                Ok(Config::default())
            }
            Err(e) => {
                error!("Configuration error in '{}': {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Check value ranges that the TOML schema cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.bits < MIN_KEY_BITS || self.keys.bits % 2 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "keys.bits must be even and at least {}, got {}",
                MIN_KEY_BITS, self.keys.bits
            )));
        }
        if self.alerts.queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.queue_size must be greater than 0".to_string(),
            ));
        }
        if self.alerts.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.cooldown_window().is_none() {
            return Err(ConfigError::ValidationError(
                "alerts.cooldown_seconds is too large".to_string(),
            ));
        }
        if let Some(command) = &self.alerts.command {
            if command.first().map_or(true, |program| program.trim().is_empty()) {
                return Err(ConfigError::ValidationError(
                    "alerts.command must name a program".to_string(),
                ));
            }
        }

        for (name, range) in &self.thresholds {
            if name.parse::<Metric>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "thresholds.{} does not name a known metric",
                    name
                )));
            }
            if !range.low.is_finite() || !range.high.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "thresholds.{} bounds must be finite",
                    name
                )));
            }
            if range.low > range.high {
                return Err(ConfigError::ValidationError(format!(
                    "thresholds.{}: low ({}) is above high ({})",
                    name, range.low, range.high
                )));
            }
        }

        Ok(())
    }

    /// Default ranges with the configured overrides applied
    pub fn threshold_table(&self) -> HashMap<Metric, ThresholdRange> {
        Metric::ALL
            .iter()
            .map(|&metric| {
                let range = self
                    .thresholds
                    .get(metric.as_str())
                    .copied()
                    .unwrap_or_else(|| metric.default_range());
                (metric, range)
            })
            .collect()
    }

    /// Alert cooldown window; validated configurations always have one
    pub fn cooldown(&self) -> chrono::Duration {
        self.cooldown_window()
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_COOLDOWN_SECONDS))
    }

    fn cooldown_window(&self) -> Option<chrono::Duration> {
        i64::try_from(self.alerts.cooldown_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    /// Build the notifier selected by `[alerts]`
    pub fn notifier(&self) -> Box<dyn Notifier> {
        match self.alerts.command.as_deref() {
            Some([program, args @ ..]) => {
                Box::new(CommandNotifier::new(program.clone(), args.to_vec()))
            }
            _ => Box::new(LogNotifier),
        }
    }
}
