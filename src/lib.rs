//! # PV I-V Curve Tracer Library
//!
//! This library drives an electronic load through a sequence of current or
//! voltage setpoints to trace the I-V characteristic of a photovoltaic cell.
//! It enforces protection limits on every measurement, derives the cell's
//! figures of merit from the recorded curve and compares recorded curves.
//! A diode-model simulated load stands in for hardware when none is attached.

pub mod analysis;
pub mod config;
pub mod export;
pub mod instrument;
pub mod link;
pub mod protection;
pub mod samples;
pub mod scpi;
pub mod settings;
pub mod simulated;
pub mod sink;
pub mod sweep;

pub use analysis::{curve_statistics, fill_factor, max_power_point, CurveCollection, CurveRecord, CurveStatistics, MaxPowerPoint};
pub use config::{SenseMode, SweepConfig, SweepMode, ValidationError};
pub use export::{CsvSink, ExportError, SweepMetadata};
pub use instrument::{InstrumentAdapter, InstrumentError, InstrumentSelection};
pub use protection::{LimitKind, ProtectionViolation};
pub use samples::{Sample, SampleSet};
pub use settings::{Settings, SettingsError};
pub use simulated::{DiodeModel, SimulatedLoad};
pub use sink::{ChannelSink, CurveSnapshot, DisplaySink, NullSink, PersistenceSink, Progress, SweepEvent};
pub use sweep::{CancelToken, StopReason, SweepController, SweepError, SweepResult, SweepState};
