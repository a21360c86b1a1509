//! Outputs of a running sweep: the live display stream and the final
//! persistence handoff.

use std::path::PathBuf;

use crossbeam_channel::Sender;
use log::{debug, info};

use crate::analysis::MaxPowerPoint;
use crate::export::{ExportError, SweepMetadata};
use crate::samples::SampleSet;
use crate::sweep::{StopReason, SweepResult};

/// How far through its setpoints a sweep is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Completed share in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Columns of the curve accumulated so far.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurveSnapshot {
    pub voltages: Vec<f64>,
    pub currents: Vec<f64>,
    pub powers: Vec<f64>,
    pub progress: Progress,
}

impl CurveSnapshot {
    pub fn from_samples(samples: &SampleSet, progress: Progress) -> Self {
        Self {
            voltages: samples.voltages(),
            currents: samples.currents(),
            powers: samples.powers(),
            progress,
        }
    }

    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }
}

/// Receives the live sample stream. Called from the sweep worker thread.
pub trait DisplaySink {
    /// Called after every iteration that passed protection.
    fn update(&mut self, snapshot: &CurveSnapshot);

    /// Called once at the end of the sweep. `None` means no data was collected.
    fn summary(&mut self, max_power: Option<&MaxPowerPoint>);

    /// Called last, with the reason the sweep stopped.
    fn finished(&mut self, _reason: &StopReason) {}
}

/// Receives the final result of every sweep that reached the instrument.
pub trait PersistenceSink {
    /// Stores the result, returning where it went if anywhere.
    fn persist(&mut self, result: &SweepResult, metadata: &SweepMetadata) -> Result<Option<PathBuf>, ExportError>;
}

/// Display updates as messages, for consumers on another thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    Update(CurveSnapshot),
    Summary(Option<MaxPowerPoint>),
    Finished(StopReason),
}

/// Forwards display updates over a channel to the interaction thread.
pub struct ChannelSink {
    sender: Sender<SweepEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<SweepEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: SweepEvent) {
        // a vanished receiver must not abort the sweep
        if self.sender.send(event).is_err() {
            debug!("display receiver disconnected, dropping event");
        }
    }
}

impl DisplaySink for ChannelSink {
    fn update(&mut self, snapshot: &CurveSnapshot) {
        self.send(SweepEvent::Update(snapshot.clone()));
    }

    fn summary(&mut self, max_power: Option<&MaxPowerPoint>) {
        self.send(SweepEvent::Summary(max_power.copied()));
    }

    fn finished(&mut self, reason: &StopReason) {
        self.send(SweepEvent::Finished(reason.clone()));
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn update(&mut self, _snapshot: &CurveSnapshot) {}

    fn summary(&mut self, _max_power: Option<&MaxPowerPoint>) {}
}

/// Reports progress through the logger, for runs without a terminal UI.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    last_reported: usize,
}

impl DisplaySink for LogSink {
    fn update(&mut self, snapshot: &CurveSnapshot) {
        let Some(index) = snapshot.len().checked_sub(1) else {
            return;
        };
        if snapshot.len() == self.last_reported {
            return;
        }
        self.last_reported = snapshot.len();
        info!(
            "[{}/{}] V = {:.3} V, I = {:.3} A, P = {:.3} W",
            snapshot.progress.completed,
            snapshot.progress.total,
            snapshot.voltages[index],
            snapshot.currents[index],
            snapshot.powers[index]
        );
    }

    fn summary(&mut self, max_power: Option<&MaxPowerPoint>) {
        match max_power {
            Some(mpp) => info!("Pmp = {:.3} W at Vmp = {:.3} V, Imp = {:.3} A", mpp.pmp, mpp.vmp, mpp.imp),
            None => info!("no data"),
        }
    }
}
