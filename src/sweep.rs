//! Sweep controller: walks the setpoints of a [`SweepConfig`] on a dedicated
//! worker thread, measuring and protecting at every step.
//!
//! ```text
//! Idle -> Configuring -> Running -> Completed | Stopped | Faulted
//! ```
//!
//! A terminal state goes back to `Idle` when the next sweep is requested.
//! Whatever path a sweep takes, the load input is switched off and the
//! adapter closed exactly once before the worker exits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::analysis::{max_power_point, MaxPowerPoint};
use crate::config::{SweepConfig, SweepMode, ValidationError};
use crate::export::SweepMetadata;
use crate::instrument::{query_f64, InstrumentAdapter, InstrumentError};
use crate::protection::{self, ProtectionViolation};
use crate::samples::{Sample, SampleSet};
use crate::scpi::ScpiCommand;
use crate::sink::{CurveSnapshot, DisplaySink, PersistenceSink, Progress};

/// Pause between the sense-mode write and switching the input on.
pub const DEFAULT_CONFIGURE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Configuring,
    Running,
    Completed,
    Stopped,
    Faulted,
}

impl SweepState {
    /// True while a worker owns the instrument.
    pub fn is_active(&self) -> bool {
        matches!(self, SweepState::Configuring | SweepState::Running)
    }
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepState::Idle => "idle",
            SweepState::Configuring => "configuring",
            SweepState::Running => "running",
            SweepState::Completed => "completed",
            SweepState::Stopped => "stopped",
            SweepState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Cooperative stop request, polled once per sweep iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why the sweep loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Every setpoint was visited.
    Normal,
    UserRequested,
    ProtectionTripped(ProtectionViolation),
    /// Communication failure, timeout or unusable response.
    InstrumentError(String),
}

impl StopReason {
    /// State the controller settles in for this reason.
    pub fn terminal_state(&self) -> SweepState {
        match self {
            StopReason::Normal => SweepState::Completed,
            StopReason::UserRequested => SweepState::Stopped,
            StopReason::ProtectionTripped(_) | StopReason::InstrumentError(_) => SweepState::Faulted,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Normal => write!(f, "Sweep completed"),
            StopReason::UserRequested => write!(f, "Sweep stopped by user"),
            StopReason::ProtectionTripped(violation) => write!(f, "Protection Triggered: {}", violation),
            StopReason::InstrumentError(message) => write!(f, "Instrument error: {}", message),
        }
    }
}

/// Everything a finished sweep produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub samples: SampleSet,
    pub stopped: StopReason,
    /// Derived once at the end, `None` when no sample was accepted.
    pub max_power: Option<MaxPowerPoint>,
    pub steps_planned: usize,
}

impl SweepResult {
    fn new(samples: SampleSet, stopped: StopReason, steps_planned: usize) -> Self {
        let max_power = max_power_point(samples.as_slice());
        Self { samples, stopped, max_power, steps_planned }
    }

    pub fn pmp(&self) -> Option<f64> {
        self.max_power.map(|mpp| mpp.pmp)
    }

    pub fn vmp(&self) -> Option<f64> {
        self.max_power.map(|mpp| mpp.vmp)
    }

    pub fn imp(&self) -> Option<f64> {
        self.max_power.map(|mpp| mpp.imp)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("invalid sweep configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("a sweep is already running")]
    AlreadyRunning,
    #[error("no sweep has been started")]
    NotStarted,
    #[error("failed to spawn sweep worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("sweep worker panicked")]
    WorkerPanicked,
}

/// Owns the adapter for the lifetime of one sweep and switches the load off
/// on release. Dropping an unreleased session releases it, so a panicking
/// worker still leaves the load safe.
struct Session<A: InstrumentAdapter> {
    adapter: A,
    released: bool,
}

impl<A: InstrumentAdapter> Session<A> {
    fn new(adapter: A) -> Self {
        Self { adapter, released: false }
    }

    fn write(&mut self, command: ScpiCommand) -> Result<(), InstrumentError> {
        debug!("write {}", command);
        self.adapter.write(&command.to_string())
    }

    fn query(&mut self, command: ScpiCommand) -> Result<String, InstrumentError> {
        debug!("query {}", command);
        self.adapter.query(&command.to_string())
    }

    fn measure(&mut self, command: ScpiCommand) -> Result<f64, InstrumentError> {
        debug!("query {}", command);
        query_f64(&mut self.adapter, &command.to_string())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.adapter.write(&ScpiCommand::Input(false).to_string()) {
            warn!("failed to switch the load input off: {}", e);
        }
        if let Err(e) = self.adapter.close() {
            warn!("failed to close the instrument: {}", e);
        }
    }
}

impl<A: InstrumentAdapter> Drop for Session<A> {
    fn drop(&mut self) {
        self.release();
    }
}

fn setpoint_command(mode: SweepMode, value: f64) -> ScpiCommand {
    match mode {
        SweepMode::ConstantCurrent => ScpiCommand::SetCurrent(value),
        SweepMode::ConstantVoltage => ScpiCommand::SetVoltage(value),
    }
}

fn lock_state(state: &Mutex<SweepState>) -> MutexGuard<'_, SweepState> {
    // the state is a plain enum, a poisoned lock still holds a valid value
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the worker thread needs, moved in at spawn time.
struct Worker<A: InstrumentAdapter> {
    config: SweepConfig,
    session: Session<A>,
    display: Box<dyn DisplaySink + Send>,
    persistence: Option<Box<dyn PersistenceSink + Send>>,
    state: Arc<Mutex<SweepState>>,
    cancel: CancelToken,
    configure_delay: Duration,
}

impl<A: InstrumentAdapter> Worker<A> {
    fn run(mut self) -> SweepResult {
        let instrument = self.session.adapter.identity();
        let steps_planned = self.config.total_steps();
        let mut samples = SampleSet::new();

        info!(
            "starting {} sweep {} -> {} step {} on {} ({} points)",
            self.config.mode, self.config.start, self.config.end, self.config.step, instrument, steps_planned
        );

        let stopped = match self.configure() {
            Ok(()) => {
                *lock_state(&self.state) = SweepState::Running;
                self.sweep(&mut samples, steps_planned)
            }
            Err(e) => StopReason::InstrumentError(e.to_string()),
        };

        self.session.release();

        match &stopped {
            StopReason::ProtectionTripped(violation) => warn!("Protection Triggered: {}", violation),
            StopReason::InstrumentError(message) => warn!("sweep aborted: {}", message),
            _ => info!("{} with {} samples", stopped, samples.len()),
        }

        let result = SweepResult::new(samples, stopped, steps_planned);
        self.display.summary(result.max_power.as_ref());

        if let Some(persistence) = self.persistence.as_mut() {
            let metadata = SweepMetadata::new(&self.config, &instrument);
            match persistence.persist(&result, &metadata) {
                Ok(Some(path)) => info!("saved sweep to {}", path.display()),
                Ok(None) => {}
                Err(e) => warn!("failed to save sweep: {}", e),
            }
        }

        self.display.finished(&result.stopped);
        *lock_state(&self.state) = result.stopped.terminal_state();
        result
    }

    /// Brings the load from an unknown state to the first setpoint.
    fn configure(&mut self) -> Result<(), InstrumentError> {
        let config = &self.config;
        let session = &mut self.session;

        session.write(ScpiCommand::Reset)?;
        session.write(ScpiCommand::ClearStatus)?;
        let idn = session.query(ScpiCommand::Identify)?;
        info!("instrument identifies as '{}'", idn.trim());

        session.write(ScpiCommand::SetFunction(config.mode.function()))?;

        session.write(ScpiCommand::VoltageProtectionState(config.voltage_limit.is_some()))?;
        if let Some(limit) = config.voltage_limit {
            session.write(ScpiCommand::VoltageProtectionLimit(limit))?;
        }
        session.write(ScpiCommand::CurrentProtectionState(config.current_limit.is_some()))?;
        if let Some(limit) = config.current_limit {
            session.write(ScpiCommand::CurrentProtectionLimit(limit))?;
        }

        session.write(ScpiCommand::RemoteSense(config.sense.remote_sense()))?;
        thread::sleep(self.configure_delay);

        session.write(ScpiCommand::Input(true))?;
        session.write(setpoint_command(config.mode, config.start))?;
        thread::sleep(config.settle_delay);
        Ok(())
    }

    fn sweep(&mut self, samples: &mut SampleSet, total: usize) -> StopReason {
        match self.sweep_inner(samples, total) {
            Ok(reason) => reason,
            Err(e) => StopReason::InstrumentError(e.to_string()),
        }
    }

    fn sweep_inner(&mut self, samples: &mut SampleSet, total: usize) -> Result<StopReason, InstrumentError> {
        let config = self.config.clone();

        for (index, setpoint) in config.setpoints().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(StopReason::UserRequested);
            }

            self.session.write(setpoint_command(config.mode, setpoint))?;
            thread::sleep(config.settle_delay);

            let voltage = self.session.measure(ScpiCommand::MeasureVoltage)?;
            let current = self.session.measure(ScpiCommand::MeasureCurrent)?;
            let sample = Sample::new(voltage, current);
            debug!("setpoint {:.3}: V = {} V, I = {} A, P = {} W", setpoint, voltage, current, sample.power);

            if let Err(violation) = protection::check(&sample, &config) {
                return Ok(StopReason::ProtectionTripped(violation));
            }

            if !samples.push(sample) {
                debug!("duplicate reading at setpoint {:.3} suppressed", setpoint);
            }
            let progress = Progress { completed: index + 1, total };
            self.display.update(&CurveSnapshot::from_samples(samples, progress));
        }

        Ok(StopReason::Normal)
    }
}

/// Runs sweeps one at a time on a background worker.
pub struct SweepController {
    state: Arc<Mutex<SweepState>>,
    cancel: CancelToken,
    configure_delay: Duration,
    worker: Option<JoinHandle<SweepResult>>,
}

impl Default for SweepController {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SweepState::Idle)),
            cancel: CancelToken::new(),
            configure_delay: DEFAULT_CONFIGURE_DELAY,
            worker: None,
        }
    }

    /// Overrides the pause between configuration and enabling the input.
    pub fn with_configure_delay(mut self, delay: Duration) -> Self {
        self.configure_delay = delay;
        self
    }

    pub fn state(&self) -> SweepState {
        *lock_state(&self.state)
    }

    /// True while a worker is alive and the state is not terminal. A worker
    /// that died mid-sweep leaves an active state behind but no longer counts.
    pub fn is_running(&self) -> bool {
        self.state().is_active() && self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Handle for requesting a stop. The same token serves every sweep of
    /// this controller; it is cleared when a sweep starts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests a cooperative stop of the running sweep.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Validates `config` and starts a sweep on a worker thread.
    ///
    /// Validation failures leave the controller `Idle` without touching the
    /// adapter. The adapter is owned by the worker until the sweep ends.
    pub fn start<A>(
        &mut self,
        config: SweepConfig,
        adapter: A,
        display: Box<dyn DisplaySink + Send>,
        persistence: Option<Box<dyn PersistenceSink + Send>>,
    ) -> Result<CancelToken, SweepError>
    where
        A: InstrumentAdapter + Send + 'static,
    {
        if self.is_running() {
            return Err(SweepError::AlreadyRunning);
        }
        // reap the previous worker, its result was not collected
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("previous sweep worker panicked");
                *lock_state(&self.state) = SweepState::Faulted;
            }
        }
        *lock_state(&self.state) = SweepState::Idle;

        config.validate()?;

        self.cancel.reset();
        *lock_state(&self.state) = SweepState::Configuring;

        let worker = Worker {
            config,
            session: Session::new(adapter),
            display,
            persistence,
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            configure_delay: self.configure_delay,
        };

        let spawned = thread::Builder::new().name("sweep-worker".to_string()).spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(self.cancel.clone())
            }
            Err(e) => {
                *lock_state(&self.state) = SweepState::Idle;
                Err(SweepError::Spawn(e))
            }
        }
    }

    /// Blocks until the current sweep finishes and returns its result.
    pub fn wait(&mut self) -> Result<SweepResult, SweepError> {
        let handle = self.worker.take().ok_or(SweepError::NotStarted)?;
        handle.join().map_err(|_| {
            *lock_state(&self.state) = SweepState::Faulted;
            SweepError::WorkerPanicked
        })
    }

    /// Starts a sweep and waits for it.
    pub fn run<A>(
        &mut self,
        config: SweepConfig,
        adapter: A,
        display: Box<dyn DisplaySink + Send>,
        persistence: Option<Box<dyn PersistenceSink + Send>>,
    ) -> Result<SweepResult, SweepError>
    where
        A: InstrumentAdapter + Send + 'static,
    {
        self.start(config, adapter, display, persistence)?;
        self.wait()
    }
}
