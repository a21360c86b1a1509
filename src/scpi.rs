//! ASCII command set spoken by the electronic load.
//!
//! Every command the tracer sends is built from [`ScpiCommand`] and rendered
//! through its `Display` impl, so the wire format lives in exactly one place.
//! The same type parses incoming command strings for the simulated load.

use std::fmt;
use std::num::ParseFloatError;
use std::str::FromStr;

// Errors raised while parsing a command string.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// The command string contained no header.
    #[error("empty command")]
    Empty,
    /// The header is not part of the supported command set.
    #[error("unrecognized command header '{0}'")]
    UnknownHeader(String),
    /// The header requires a parameter but none was given.
    #[error("command '{0}' requires a parameter")]
    MissingParameter(String),
    /// The parameter is not one of the accepted keywords.
    #[error("invalid parameter '{0}'")]
    InvalidParameter(String),
    /// The parameter should be a number but could not be parsed as one.
    #[error("invalid numeric parameter: {0}")]
    InvalidNumber(#[from] ParseFloatError),
}

/// Operating function of the load: constant current or constant voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Current,
    Voltage,
}

impl Function {
    /// Keyword used on the wire (`CURR` / `VOLT`).
    pub fn keyword(&self) -> &'static str {
        match self {
            Function::Current => "CURR",
            Function::Voltage => "VOLT",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for Function {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CURR" | "CURRENT" => Ok(Function::Current),
            "VOLT" | "VOLTAGE" => Ok(Function::Voltage),
            other => Err(CommandError::InvalidParameter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScpiCommand {
    /// `FUNC {CURR|VOLT}`
    SetFunction(Function),
    /// `FUNC?`
    QueryFunction,
    /// `CURR <amps>`
    SetCurrent(f64),
    /// `VOLT <volts>`
    SetVoltage(f64),
    /// `VOLT:PROT:STAT {ON|OFF}`
    VoltageProtectionState(bool),
    /// `VOLT:PROT <volts>`
    VoltageProtectionLimit(f64),
    /// `CURR:PROT:STAT {ON|OFF}`
    CurrentProtectionState(bool),
    /// `CURR:PROT <amps>`
    CurrentProtectionLimit(f64),
    /// `REM:SENS {ON|OFF}`, ON selects 4-wire (remote) sensing
    RemoteSense(bool),
    /// `REM:SENS?`
    QueryRemoteSense,
    /// `INPUT {ON|OFF}`
    Input(bool),
    /// `MEAS:VOLT?`
    MeasureVoltage,
    /// `MEAS:CURR?`
    MeasureCurrent,
    /// `*RST`
    Reset,
    /// `*CLS`
    ClearStatus,
    /// `*IDN?`
    Identify,
}

impl ScpiCommand {
    /// Returns true when the instrument answers this command with a response line.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            ScpiCommand::QueryFunction
                | ScpiCommand::QueryRemoteSense
                | ScpiCommand::MeasureVoltage
                | ScpiCommand::MeasureCurrent
                | ScpiCommand::Identify
        )
    }
}

fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

impl fmt::Display for ScpiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiCommand::SetFunction(function) => write!(f, "FUNC {}", function),
            ScpiCommand::QueryFunction => write!(f, "FUNC?"),
            ScpiCommand::SetCurrent(amps) => write!(f, "CURR {:.3}", amps),
            ScpiCommand::SetVoltage(volts) => write!(f, "VOLT {:.3}", volts),
            ScpiCommand::VoltageProtectionState(state) => write!(f, "VOLT:PROT:STAT {}", on_off(*state)),
            ScpiCommand::VoltageProtectionLimit(volts) => write!(f, "VOLT:PROT {:.3}", volts),
            ScpiCommand::CurrentProtectionState(state) => write!(f, "CURR:PROT:STAT {}", on_off(*state)),
            ScpiCommand::CurrentProtectionLimit(amps) => write!(f, "CURR:PROT {:.3}", amps),
            ScpiCommand::RemoteSense(state) => write!(f, "REM:SENS {}", on_off(*state)),
            ScpiCommand::QueryRemoteSense => write!(f, "REM:SENS?"),
            ScpiCommand::Input(state) => write!(f, "INPUT {}", on_off(*state)),
            ScpiCommand::MeasureVoltage => write!(f, "MEAS:VOLT?"),
            ScpiCommand::MeasureCurrent => write!(f, "MEAS:CURR?"),
            ScpiCommand::Reset => write!(f, "*RST"),
            ScpiCommand::ClearStatus => write!(f, "*CLS"),
            ScpiCommand::Identify => write!(f, "*IDN?"),
        }
    }
}

fn parse_state(header: &str, arg: Option<&str>) -> Result<bool, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::MissingParameter(header.to_string()))?;
    match arg.to_ascii_uppercase().as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        other => Err(CommandError::InvalidParameter(other.to_string())),
    }
}

fn parse_number(header: &str, arg: Option<&str>) -> Result<f64, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::MissingParameter(header.to_string()))?;
    Ok(arg.parse::<f64>()?)
}

impl FromStr for ScpiCommand {
    type Err = CommandError;

    /// Parses a single command line. Headers are case-insensitive and any
    /// trailing line ending is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let header = parts.next().ok_or(CommandError::Empty)?.to_ascii_uppercase();
        let arg = parts.next();

        match header.as_str() {
            "FUNC" => {
                let arg = arg.ok_or_else(|| CommandError::MissingParameter(header.clone()))?;
                Ok(ScpiCommand::SetFunction(arg.parse()?))
            }
            "FUNC?" => Ok(ScpiCommand::QueryFunction),
            "CURR" => Ok(ScpiCommand::SetCurrent(parse_number(&header, arg)?)),
            "VOLT" => Ok(ScpiCommand::SetVoltage(parse_number(&header, arg)?)),
            "VOLT:PROT:STAT" => Ok(ScpiCommand::VoltageProtectionState(parse_state(&header, arg)?)),
            "VOLT:PROT" => Ok(ScpiCommand::VoltageProtectionLimit(parse_number(&header, arg)?)),
            "CURR:PROT:STAT" => Ok(ScpiCommand::CurrentProtectionState(parse_state(&header, arg)?)),
            "CURR:PROT" => Ok(ScpiCommand::CurrentProtectionLimit(parse_number(&header, arg)?)),
            "REM:SENS" => Ok(ScpiCommand::RemoteSense(parse_state(&header, arg)?)),
            "REM:SENS?" => Ok(ScpiCommand::QueryRemoteSense),
            "INPUT" => Ok(ScpiCommand::Input(parse_state(&header, arg)?)),
            "MEAS:VOLT?" => Ok(ScpiCommand::MeasureVoltage),
            "MEAS:CURR?" => Ok(ScpiCommand::MeasureCurrent),
            "*RST" => Ok(ScpiCommand::Reset),
            "*CLS" => Ok(ScpiCommand::ClearStatus),
            "*IDN?" => Ok(ScpiCommand::Identify),
            _ => Err(CommandError::UnknownHeader(header)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Formatting ---

    #[test]
    fn setpoints_use_three_decimals() {
        assert_eq!(ScpiCommand::SetCurrent(1.5).to_string(), "CURR 1.500");
        assert_eq!(ScpiCommand::SetVoltage(0.12345).to_string(), "VOLT 0.123");
        assert_eq!(ScpiCommand::VoltageProtectionLimit(20.0).to_string(), "VOLT:PROT 20.000");
        assert_eq!(ScpiCommand::CurrentProtectionLimit(5.25).to_string(), "CURR:PROT 5.250");
    }

    #[test]
    fn state_commands_render_on_off() {
        assert_eq!(ScpiCommand::Input(true).to_string(), "INPUT ON");
        assert_eq!(ScpiCommand::Input(false).to_string(), "INPUT OFF");
        assert_eq!(ScpiCommand::RemoteSense(true).to_string(), "REM:SENS ON");
        assert_eq!(ScpiCommand::VoltageProtectionState(false).to_string(), "VOLT:PROT:STAT OFF");
        assert_eq!(ScpiCommand::SetFunction(Function::Voltage).to_string(), "FUNC VOLT");
    }

    #[test]
    fn queries_are_flagged() {
        assert!(ScpiCommand::MeasureVoltage.is_query());
        assert!(ScpiCommand::Identify.is_query());
        assert!(!ScpiCommand::SetCurrent(0.0).is_query());
        assert!(!ScpiCommand::Reset.is_query());
    }

    // --- Parsing ---

    #[test]
    fn parse_setpoint_commands() {
        assert_eq!("CURR 1.250".parse::<ScpiCommand>().unwrap(), ScpiCommand::SetCurrent(1.25));
        assert_eq!("volt 3".parse::<ScpiCommand>().unwrap(), ScpiCommand::SetVoltage(3.0));
        assert_eq!(
            "FUNC VOLT\n".parse::<ScpiCommand>().unwrap(),
            ScpiCommand::SetFunction(Function::Voltage)
        );
    }

    #[test]
    fn parse_protection_commands() {
        assert_eq!(
            "VOLT:PROT:STAT ON".parse::<ScpiCommand>().unwrap(),
            ScpiCommand::VoltageProtectionState(true)
        );
        assert_eq!(
            "CURR:PROT 4.5".parse::<ScpiCommand>().unwrap(),
            ScpiCommand::CurrentProtectionLimit(4.5)
        );
    }

    #[test]
    fn rendered_commands_parse_back() {
        let commands = [
            ScpiCommand::SetFunction(Function::Current),
            ScpiCommand::QueryFunction,
            ScpiCommand::CurrentProtectionState(false),
            ScpiCommand::QueryRemoteSense,
            ScpiCommand::MeasureCurrent,
            ScpiCommand::ClearStatus,
            ScpiCommand::Identify,
        ];
        for command in commands {
            assert_eq!(command.to_string().parse::<ScpiCommand>().unwrap(), command);
        }
    }

    #[test]
    fn reject_malformed_commands() {
        assert_eq!("".parse::<ScpiCommand>().unwrap_err(), CommandError::Empty);
        assert_eq!(
            "CURR".parse::<ScpiCommand>().unwrap_err(),
            CommandError::MissingParameter(String::from("CURR"))
        );
        assert_eq!(
            "INPUT MAYBE".parse::<ScpiCommand>().unwrap_err(),
            CommandError::InvalidParameter(String::from("MAYBE"))
        );
        assert!(matches!("VOLT abc".parse::<ScpiCommand>(), Err(CommandError::InvalidNumber(_))));
        assert_eq!(
            "SYST:ERR?".parse::<ScpiCommand>().unwrap_err(),
            CommandError::UnknownHeader(String::from("SYST:ERR?"))
        );
    }
}
