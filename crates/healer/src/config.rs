//! Engine configuration
//!
//! `EngineConfig` is built once (defaults, then the optional YAML file, then
//! CLI flags) and handed to the engine by value. Nothing mutates it after the
//! engine is constructed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::classifier::DEFAULT_RESTART_THRESHOLD;
use crate::error::{Error, Result};

/// Minimum interval between two remediations of the same pod
pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Interval at which the watch cache re-delivers every pod
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Hard upper bound for a single pod delete call
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often stale cooldown entries are evicted
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// How long a namespace watcher may take to populate its cache
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// How long `run` waits for watchers to unwind after shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Immutable configuration for the remediation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cooldown_window: Duration,
    pub restart_threshold: u32,
    pub resync_period: Duration,
    pub delete_timeout: Duration,
    pub sweep_interval: Duration,
    pub sync_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
            resync_period: DEFAULT_RESYNC_PERIOD,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.restart_threshold == 0 {
            return Err(Error::Config(
                "restart threshold must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("cooldown window", self.cooldown_window),
            ("resync period", self.resync_period),
            ("delete timeout", self.delete_timeout),
            ("sweep interval", self.sweep_interval),
            ("sync timeout", self.sync_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        Ok(())
    }
}

/// Optional on-disk configuration, every field may be omitted
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub heal_cooldown: Option<Duration>,

    #[serde(default)]
    pub restart_threshold: Option<u32>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub resync_period: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub delete_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub sweep_interval: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub sync_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub shutdown_grace: Option<Duration>,

    /// Namespace names or wildcard patterns
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label that opts a pod out of remediation when set to "true"
    #[serde(default)]
    pub exclude_label: Option<String>,
}

impl FileConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Overlay the file values on top of the built-in defaults
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            cooldown_window: self.heal_cooldown.unwrap_or(defaults.cooldown_window),
            restart_threshold: self.restart_threshold.unwrap_or(defaults.restart_threshold),
            resync_period: self.resync_period.unwrap_or(defaults.resync_period),
            delete_timeout: self.delete_timeout.unwrap_or(defaults.delete_timeout),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            sync_timeout: self.sync_timeout.unwrap_or(defaults.sync_timeout),
            shutdown_grace: self.shutdown_grace.unwrap_or(defaults.shutdown_grace),
        }
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Parse a duration string like "10m", "30s", "500ms" or "1h30m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(Error::Config(format!("invalid duration '{s}'")));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| Error::Config(format!("invalid duration '{s}'")))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let too_large = || Error::Config(format!("duration '{s}' is too large"));
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            unit => {
                return Err(Error::Config(format!(
                    "invalid duration unit '{unit}' in '{s}'"
                )))
            }
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}
