//! Settings remembered between sessions, stored as TOML.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{SenseMode, SweepConfig, SweepMode, ValidationError};
use crate::instrument::InstrumentSelection;

/// File the binary reads and writes when no other path is given.
pub const DEFAULT_SETTINGS_FILE: &str = "iv_tracer.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Everything needed to repeat the last sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: SweepMode,
    pub sense: SenseMode,
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub settle_delay_s: f64,
    // absent from the file means no limit, not the default limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<f64>,
    /// `simulated` or a serial port path.
    pub instrument: String,
    pub baud_rate: u32,
    pub save_csv: bool,
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: SweepMode::ConstantCurrent,
            sense: SenseMode::TwoWire,
            start: 0.0,
            end: 5.0,
            step: 0.1,
            settle_delay_s: 0.5,
            voltage_limit: Some(26.0),
            current_limit: None,
            instrument: String::from("simulated"),
            baud_rate: 9600,
            save_csv: true,
            output_dir: PathBuf::from("measurements"),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_str(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(SettingsError::Io { path: path.to_path_buf(), source }),
        }
    }

    pub fn from_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        debug!("settings saved to {}", path.display());
        Ok(())
    }

    /// The sweep these settings describe. Not validated.
    pub fn to_sweep_config(&self) -> SweepConfig {
        SweepConfig {
            mode: self.mode,
            start: self.start,
            end: self.end,
            step: self.step,
            // negative or non-finite delays mean no delay
            settle_delay: Duration::try_from_secs_f64(self.settle_delay_s).unwrap_or(Duration::ZERO),
            voltage_limit: self.voltage_limit,
            current_limit: self.current_limit,
            sense: self.sense,
        }
    }

    pub fn instrument_selection(&self) -> Result<InstrumentSelection, ValidationError> {
        InstrumentSelection::from_name(&self.instrument, self.baud_rate)
    }
}
