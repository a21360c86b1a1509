//! Uniform command/query interface over a physical or simulated electronic load.

use std::io;
use std::time::Duration;

use crate::config::ValidationError;
use crate::link::{self, ScpiLink};
use crate::simulated::SimulatedLoad;

/// Default time a query waits for its response line.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

// Errors raised while talking to an instrument.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    /// The transport failed or the link is no longer usable.
    #[error("communication error: {0}")]
    Communication(String),
    /// No response line arrived within the query timeout.
    #[error("no response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    /// A response arrived but could not be interpreted.
    #[error("unexpected response to '{command}': '{response}'")]
    InvalidResponse { command: String, response: String },
    /// The instrument refused a malformed command.
    #[error("command '{command}' rejected: {reason}")]
    Rejected { command: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Command/query capability shared by every load the tracer can drive.
///
/// No operation is reentrant: a single owner issues one call at a time.
pub trait InstrumentAdapter {
    /// Sends a command that produces no response.
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Sends a command and blocks until its response line is available.
    fn query(&mut self, command: &str) -> Result<String, InstrumentError>;

    /// Releases the instrument. Further calls are not expected to succeed.
    fn close(&mut self) -> Result<(), InstrumentError>;

    /// Human readable identifier recorded alongside measurements.
    fn identity(&self) -> String {
        String::from("unknown instrument")
    }
}

impl<A: InstrumentAdapter + ?Sized> InstrumentAdapter for Box<A> {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        (**self).query(command)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        (**self).close()
    }

    fn identity(&self) -> String {
        (**self).identity()
    }
}

/// Issues a query and parses the response as a floating point number.
pub fn query_f64<A: InstrumentAdapter + ?Sized>(adapter: &mut A, command: &str) -> Result<f64, InstrumentError> {
    let response = adapter.query(command)?;
    response.trim().parse::<f64>().map_err(|_| InstrumentError::InvalidResponse {
        command: command.to_string(),
        response: response.trim().to_string(),
    })
}

/// Name under which the simulated load is offered to the user.
pub const SIMULATED_INSTRUMENT: &str = "Simulated Instrument";

/// Which instrument a sweep should drive, chosen once before the sweep starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentSelection {
    Simulated,
    Serial { port: String, baud_rate: u32 },
}

impl InstrumentSelection {
    /// Interprets a user supplied instrument name.
    ///
    /// `simulated` (any case) or the full simulated instrument name selects the
    /// diode model; any other non-empty string is treated as a serial port path.
    pub fn from_name(name: &str, baud_rate: u32) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::NoInstrument);
        }
        if name.eq_ignore_ascii_case("simulated") || name == SIMULATED_INSTRUMENT {
            Ok(InstrumentSelection::Simulated)
        } else {
            Ok(InstrumentSelection::Serial { port: name.to_string(), baud_rate })
        }
    }

    /// Label recorded in the metadata of saved sweeps.
    pub fn label(&self) -> String {
        match self {
            InstrumentSelection::Simulated => String::from(SIMULATED_INSTRUMENT),
            InstrumentSelection::Serial { port, .. } => port.clone(),
        }
    }

    /// Opens the selected instrument.
    pub fn open(&self, timeout: Duration) -> Result<Box<dyn InstrumentAdapter + Send>, InstrumentError> {
        match self {
            InstrumentSelection::Simulated => Ok(Box::new(SimulatedLoad::new())),
            InstrumentSelection::Serial { port, baud_rate } => {
                let link: ScpiLink<Box<dyn serialport::SerialPort>> = link::open_serial(port, *baud_rate, timeout)?;
                Ok(Box::new(link))
            }
        }
    }
}
