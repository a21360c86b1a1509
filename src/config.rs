//! Sweep configuration and its validation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scpi::Function;

/// Most setpoints a single sweep may visit.
pub const MAX_STEPS: usize = 100_000;

// Reasons a sweep configuration is refused before any instrument is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("step value cannot be zero")]
    ZeroStep,
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
    #[error("in CC mode the voltage limit is mandatory to protect the cell")]
    MissingVoltageLimit,
    #[error("in CV mode the current limit is mandatory to protect the cell")]
    MissingCurrentLimit,
    #[error("no instrument selected")]
    NoInstrument,
    #[error("sweep would take {steps} steps, more than the {max} allowed")]
    TooManySteps { steps: f64, max: usize },
    #[error("unknown {kind} '{value}'")]
    UnknownOption { kind: &'static str, value: String },
}

/// Operating mode of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepMode {
    /// Constant current: current setpoints are swept and voltage is measured.
    #[serde(rename = "CC")]
    ConstantCurrent,
    /// Constant voltage: voltage setpoints are swept and current is measured.
    #[serde(rename = "CV")]
    ConstantVoltage,
}

impl SweepMode {
    pub fn function(&self) -> Function {
        match self {
            SweepMode::ConstantCurrent => Function::Current,
            SweepMode::ConstantVoltage => Function::Voltage,
        }
    }

    /// Short label used in file names and metadata (`CC` / `CV`).
    pub fn label(&self) -> &'static str {
        match self {
            SweepMode::ConstantCurrent => "CC",
            SweepMode::ConstantVoltage => "CV",
        }
    }

    /// Unit of the swept quantity.
    pub fn unit(&self) -> &'static str {
        match self {
            SweepMode::ConstantCurrent => "A",
            SweepMode::ConstantVoltage => "V",
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SweepMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CC" => Ok(SweepMode::ConstantCurrent),
            "CV" => Ok(SweepMode::ConstantVoltage),
            _ => Err(ValidationError::UnknownOption { kind: "mode", value: s.to_string() }),
        }
    }
}

/// Measurement wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenseMode {
    #[serde(rename = "2-Wire")]
    TwoWire,
    /// Remote (Kelvin) sensing.
    #[serde(rename = "4-Wire")]
    FourWire,
}

impl SenseMode {
    pub fn label(&self) -> &'static str {
        match self {
            SenseMode::TwoWire => "2-Wire",
            SenseMode::FourWire => "4-Wire",
        }
    }

    pub fn remote_sense(&self) -> bool {
        matches!(self, SenseMode::FourWire)
    }
}

impl fmt::Display for SenseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SenseMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2-wire" | "2wire" | "2" | "two-wire" => Ok(SenseMode::TwoWire),
            "4-wire" | "4wire" | "4" | "four-wire" => Ok(SenseMode::FourWire),
            _ => Err(ValidationError::UnknownOption { kind: "sense mode", value: s.to_string() }),
        }
    }
}

/// Parameters of one sweep. Immutable once the sweep has started.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub mode: SweepMode,
    pub start: f64,
    pub end: f64,
    /// Step magnitude. The sign is ignored; see [`SweepConfig::signed_step`].
    pub step: f64,
    pub settle_delay: Duration,
    pub voltage_limit: Option<f64>,
    pub current_limit: Option<f64>,
    pub sense: SenseMode,
}

impl SweepConfig {
    /// A configuration with no limits and no settle delay. Limits must still be
    /// supplied before it passes [`SweepConfig::validate`].
    pub fn new(mode: SweepMode, start: f64, end: f64, step: f64) -> Self {
        Self {
            mode,
            start,
            end,
            step,
            settle_delay: Duration::ZERO,
            voltage_limit: None,
            current_limit: None,
            sense: SenseMode::TwoWire,
        }
    }

    pub fn with_voltage_limit(mut self, limit: f64) -> Self {
        self.voltage_limit = Some(limit);
        self
    }

    pub fn with_current_limit(mut self, limit: f64) -> Self {
        self.current_limit = Some(limit);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_sense(mut self, sense: SenseMode) -> Self {
        self.sense = sense;
        self
    }

    /// Checks everything that can be checked without an instrument.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [("start", self.start), ("end", self.end), ("step", self.step)] {
            if !value.is_finite() {
                return Err(ValidationError::NotFinite(name));
            }
        }
        if self.step == 0.0 {
            return Err(ValidationError::ZeroStep);
        }
        let steps = self.step_count() + 1.0;
        if !steps.is_finite() || steps > MAX_STEPS as f64 {
            return Err(ValidationError::TooManySteps { steps, max: MAX_STEPS });
        }
        if let Some(limit) = self.voltage_limit {
            if !limit.is_finite() {
                return Err(ValidationError::NotFinite("voltage limit"));
            }
        }
        if let Some(limit) = self.current_limit {
            if !limit.is_finite() {
                return Err(ValidationError::NotFinite("current limit"));
            }
        }
        match self.mode {
            SweepMode::ConstantCurrent if self.voltage_limit.is_none() => Err(ValidationError::MissingVoltageLimit),
            SweepMode::ConstantVoltage if self.current_limit.is_none() => Err(ValidationError::MissingCurrentLimit),
            _ => Ok(()),
        }
    }

    /// Step pointing from `start` toward `end`, whatever sign the user typed.
    pub fn signed_step(&self) -> f64 {
        if self.end >= self.start {
            self.step.abs()
        } else {
            -self.step.abs()
        }
    }

    /// Number of setpoints visited: `floor(|end − start| / |step|) + 1`.
    ///
    /// The last setpoint may fall short of or overshoot `end` by floating
    /// point error; it is not snapped.
    ///
    /// Saturates instead of overflowing for configurations that
    /// [`SweepConfig::validate`] would reject.
    pub fn total_steps(&self) -> usize {
        // float to int casts saturate, NaN becomes 0
        (self.step_count() as usize).saturating_add(1)
    }

    fn step_count(&self) -> f64 {
        ((self.end - self.start).abs() / self.step.abs()).floor()
    }

    /// The setpoint sequence a sweep walks through, accumulated step by step.
    pub fn setpoints(&self) -> impl Iterator<Item = f64> {
        let step = self.signed_step();
        let start = self.start;
        (0..self.total_steps()).scan(start, move |value, _| {
            let current = *value;
            *value += step;
            Some(current)
        })
    }
}
