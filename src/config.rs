//! Station configuration loading and validation.
//!
//! A station is described by a TOML file listing its devices:
//!
//! ```toml
//! log_level = "info"
//!
//! [station]
//! name = "optics-bench"
//!
//! [devices.laser]
//! driver = "tunics"
//! timeout = "15s"
//! transport = { kind = "tcp", host = "10.0.0.5", port = 5025 }
//!
//! [devices.supply]
//! driver = "mock_supply"
//! help = "Bench power supply (simulated)"
//! ```
//!
//! Values load through the `config` crate, with `LABRIG_*` environment
//! variables layered on top, and are validated before a station opens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::drivers;
use crate::error::{RigError, RigResult};
use crate::transport::TransportConfig;
use crate::utils::clean_name;

/// Top-level settings for a station.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log filter applied when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Station-wide options.
    #[serde(default)]
    pub station: StationSettings,
    /// Devices keyed by name.
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
}

/// Station-wide options.
#[derive(Debug, Clone, Deserialize)]
pub struct StationSettings {
    /// Display name of the station.
    #[serde(default = "default_station_name")]
    pub name: String,
    /// Default directory for saved variable values.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Configuration of one device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Driver id, one of [`crate::drivers::driver_ids`].
    pub driver: String,
    /// How to reach the instrument. Defaults to the driver's simulator.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    /// Transport read timeout, e.g. `"500ms"` or `"15s"`.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Free-form description shown in listings.
    #[serde(default)]
    pub help: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_station_name() -> String {
    "station".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            station: StationSettings::default(),
            devices: HashMap::new(),
        }
    }
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            data_dir: None,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from the default location when `None`.
    ///
    /// The default location is `<config dir>/labrig/station.toml`; when that
    /// file does not exist the defaults are used. An explicitly given path
    /// must exist. Environment variables prefixed with `LABRIG_` override
    /// file values, e.g. `LABRIG_LOG_LEVEL=debug`.
    pub fn load(path: Option<&Path>) -> RigResult<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };
        let config = Config::builder()
            .add_source(File::from(file.as_path()).required(required))
            .add_source(Environment::with_prefix("LABRIG").separator("__"))
            .build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The per-user default configuration path.
    pub fn default_path() -> RigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("labrig").join("station.toml"))
            .ok_or_else(|| {
                RigError::Configuration(
                    "could not determine the user configuration directory".to_string(),
                )
            })
    }

    /// Checks settings for semantic problems a parse cannot catch.
    pub fn validate(&self) -> RigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(RigError::Configuration(format!(
                "invalid log level '{}', expected one of {valid_levels:?}",
                self.log_level
            )));
        }

        let mut seen: Vec<String> = Vec::new();
        for (name, device) in &self.devices {
            let cleaned = clean_name(name);
            if cleaned.is_empty() {
                return Err(RigError::Configuration(format!(
                    "device name '{name}' is empty once cleaned"
                )));
            }
            if seen.contains(&cleaned) {
                return Err(RigError::Configuration(format!(
                    "device name '{cleaned}' is declared twice once cleaned"
                )));
            }
            seen.push(cleaned);

            if !drivers::driver_ids().contains(&device.driver.as_str()) {
                return Err(RigError::Configuration(format!(
                    "device '{name}' references unknown driver '{}', available: {:?}",
                    device.driver,
                    drivers::driver_ids()
                )));
            }
        }
        Ok(())
    }
}
