//! Simulated electronic load.
//!
//! Stands in for hardware when no instrument is attached. The load keeps the
//! same state a real load would (function, setpoints, protection settings),
//! processes the command set from [`crate::scpi`] and answers measurement
//! queries from a single-diode solar cell model. Identical inputs always
//! produce identical answers, which makes it the reference for testing the
//! sweep controller.

use log::debug;

use crate::instrument::{InstrumentAdapter, InstrumentError, SIMULATED_INSTRUMENT};
use crate::scpi::{CommandError, Function, ScpiCommand};

/// Parameters of the single-diode cell the simulated load measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiodeModel {
    /// Short-circuit current (A)
    pub isc: f64,
    /// Open-circuit voltage (V)
    pub voc: f64,
    /// Diode ideality factor
    pub ideality: f64,
    /// Thermal voltage (V)
    pub thermal_voltage: f64,
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self { isc: 5.0, voc: 25.0, ideality: 1.5, thermal_voltage: 0.7 }
    }
}

impl DiodeModel {
    fn n_vt(&self) -> f64 {
        self.ideality * self.thermal_voltage
    }

    /// Terminal voltage while sinking `current`: `V = Voc + n·Vt·ln(1 − I/Isc)`.
    ///
    /// Returns 0 in the flat region `I ≥ Isc`. Not clamped below zero.
    pub fn voltage_at(&self, current: f64) -> f64 {
        if current >= self.isc {
            0.0
        } else {
            self.voc + self.n_vt() * (1.0 - current / self.isc).ln()
        }
    }

    /// Cell current at terminal `voltage`: `I = Isc·(1 − exp((V − Voc)/(n·Vt)))`.
    ///
    /// Not clamped; negative above Voc.
    pub fn current_at(&self, voltage: f64) -> f64 {
        self.isc * (1.0 - ((voltage - self.voc) / self.n_vt()).exp())
    }
}

// The complete state of the simulated load.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedLoad {
    pub function: Function,
    pub current_setpoint: f64,
    pub voltage_setpoint: f64,
    pub voltage_protection_enabled: bool,
    pub voltage_protection_limit: Option<f64>,
    pub current_protection_enabled: bool,
    pub current_protection_limit: Option<f64>,
    model: DiodeModel,
}

impl Default for SimulatedLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLoad {
    /// Creates a load in current mode with all setpoints at zero and protection off.
    pub fn new() -> Self {
        Self::with_model(DiodeModel::default())
    }

    /// Creates a load measuring the given cell instead of the default one.
    pub fn with_model(model: DiodeModel) -> Self {
        Self {
            function: Function::Current,
            current_setpoint: 0.0,
            voltage_setpoint: 0.0,
            voltage_protection_enabled: false,
            voltage_protection_limit: None,
            current_protection_enabled: false,
            current_protection_limit: None,
            model,
        }
    }

    pub fn model(&self) -> &DiodeModel {
        &self.model
    }

    /// Processes one command line and returns the response, if the command has one.
    ///
    /// Headers outside the supported grammar are accepted and ignored, so the
    /// load tolerates everything a real instrument would be sent.
    pub fn process_command(&mut self, command_str: &str) -> Result<Option<String>, CommandError> {
        let command = match command_str.parse::<ScpiCommand>() {
            Ok(command) => command,
            Err(CommandError::UnknownHeader(header)) => {
                debug!("simulated load ignoring '{}'", header);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(self.execute_command(command))
    }

    /// Applies a parsed command and returns the response for queries.
    fn execute_command(&mut self, command: ScpiCommand) -> Option<String> {
        match command {
            ScpiCommand::SetFunction(function) => self.function = function,
            ScpiCommand::SetCurrent(amps) => self.current_setpoint = amps,
            ScpiCommand::SetVoltage(volts) => self.voltage_setpoint = volts,
            ScpiCommand::VoltageProtectionState(state) => self.voltage_protection_enabled = state,
            ScpiCommand::VoltageProtectionLimit(volts) => self.voltage_protection_limit = Some(volts),
            ScpiCommand::CurrentProtectionState(state) => self.current_protection_enabled = state,
            ScpiCommand::CurrentProtectionLimit(amps) => self.current_protection_limit = Some(amps),
            ScpiCommand::QueryFunction => return Some(self.function.keyword().to_string()),
            ScpiCommand::MeasureVoltage => return Some(self.measure_voltage().to_string()),
            ScpiCommand::MeasureCurrent => return Some(self.measure_current().to_string()),
            ScpiCommand::QueryRemoteSense | ScpiCommand::Identify => return Some(String::from("0")),
            // Input switching, sensing, reset and status clearing have no effect on the model.
            ScpiCommand::RemoteSense(_) | ScpiCommand::Input(_) | ScpiCommand::Reset | ScpiCommand::ClearStatus => {}
        }
        None
    }

    fn measure_voltage(&self) -> f64 {
        match self.function {
            Function::Current => {
                let volts = self.model.voltage_at(self.current_setpoint);
                if let Some(tripped) =
                    protection_trip(self.voltage_protection_enabled, self.voltage_protection_limit, volts)
                {
                    return tripped;
                }
                volts.max(0.0)
            }
            Function::Voltage => self.voltage_setpoint,
        }
    }

    fn measure_current(&self) -> f64 {
        match self.function {
            Function::Voltage => {
                let amps = self.model.current_at(self.voltage_setpoint).max(0.0);
                if let Some(tripped) =
                    protection_trip(self.current_protection_enabled, self.current_protection_limit, amps)
                {
                    return tripped;
                }
                amps
            }
            Function::Current => self.current_setpoint,
        }
    }
}

// A tripped protection reads back well above its limit, the way the hardware
// reports an overrange.
fn protection_trip(enabled: bool, limit: Option<f64>, value: f64) -> Option<f64> {
    match limit {
        Some(limit) if enabled && value > limit => Some(limit + 5.0),
        _ => None,
    }
}

impl InstrumentAdapter for SimulatedLoad {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.process_command(command).map(|_| ()).map_err(|e| InstrumentError::Rejected {
            command: command.to_string(),
            reason: e.to_string(),
        })
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        let response = self.process_command(command).map_err(|e| InstrumentError::Rejected {
            command: command.to_string(),
            reason: e.to_string(),
        })?;
        Ok(response.unwrap_or_else(|| String::from("0")))
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn identity(&self) -> String {
        String::from(SIMULATED_INSTRUMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn measured(load: &mut SimulatedLoad, query: &str) -> f64 {
        load.query(query).unwrap().parse().unwrap()
    }

    // --- Command handling ---

    #[test]
    fn new_load_is_idle() {
        let load = SimulatedLoad::new();
        assert_eq!(load.function, Function::Current);
        assert_eq!(load.current_setpoint, 0.0);
        assert!(!load.voltage_protection_enabled);
        assert_eq!(load.voltage_protection_limit, None);
        assert_eq!(*load.model(), DiodeModel::default());
    }

    #[test]
    fn writes_update_state() {
        let mut load = SimulatedLoad::new();
        load.write("FUNC VOLT").unwrap();
        load.write("VOLT 12.500").unwrap();
        load.write("CURR 1.250").unwrap();
        load.write("CURR:PROT:STAT ON").unwrap();
        load.write("CURR:PROT 4.000").unwrap();
        load.write("VOLT:PROT:STAT ON").unwrap();
        load.write("VOLT:PROT 21.000").unwrap();
        load.write("VOLT:PROT:STAT OFF").unwrap();

        assert_eq!(load.function, Function::Voltage);
        assert_eq!(load.voltage_setpoint, 12.5);
        assert_eq!(load.current_setpoint, 1.25);
        assert!(load.current_protection_enabled);
        assert_eq!(load.current_protection_limit, Some(4.0));
        assert!(!load.voltage_protection_enabled);
        assert_eq!(load.voltage_protection_limit, Some(21.0));
    }

    #[test]
    fn unrecognized_commands_are_noops() {
        let mut load = SimulatedLoad::new();
        let before = load.clone();
        load.write("SYST:BEEP").unwrap();
        load.write("INPUT ON").unwrap();
        load.write("REM:SENS ON").unwrap();
        load.write("*RST").unwrap();
        assert_eq!(load, before);
    }

    #[test]
    fn malformed_setpoint_is_rejected() {
        let mut load = SimulatedLoad::new();
        let err = load.write("CURR lots").unwrap_err();
        assert!(matches!(err, InstrumentError::Rejected { .. }));
        assert_eq!(load.current_setpoint, 0.0);
    }

    #[test]
    fn other_queries_return_zero() {
        let mut load = SimulatedLoad::new();
        assert_eq!(load.query("FUNC?").unwrap(), "CURR");
        assert_eq!(load.query("*IDN?").unwrap(), "0");
        assert_eq!(load.query("REM:SENS?").unwrap(), "0");
        assert_eq!(load.query("STAT:QUES:COND?").unwrap(), "0");
        assert!(load.close().is_ok());
    }

    // --- Diode model ---

    #[test]
    fn open_circuit_and_short_circuit() {
        let mut load = SimulatedLoad::new();
        load.write("CURR 0.000").unwrap();
        assert!((measured(&mut load, "MEAS:VOLT?") - 25.0).abs() < 1e-12);

        load.write("CURR 5.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:VOLT?"), 0.0);
        load.write("CURR 6.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:VOLT?"), 0.0);
    }

    #[test]
    fn raw_setpoint_is_read_back_in_other_quantity() {
        let mut load = SimulatedLoad::new();
        load.write("CURR 2.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:CURR?"), 2.0);

        load.write("FUNC VOLT").unwrap();
        load.write("VOLT 10.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:VOLT?"), 10.0);
    }

    #[test]
    fn voltage_mode_current_is_clamped_above_voc() {
        let mut load = SimulatedLoad::new();
        load.write("FUNC VOLT").unwrap();
        load.write("VOLT 30.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:CURR?"), 0.0);
    }

    #[test]
    fn swapped_model_constants() {
        let model = DiodeModel { isc: 1.0, voc: 0.6, ideality: 1.0, thermal_voltage: 0.025 };
        let mut load = SimulatedLoad::with_model(model);
        load.write("CURR 0.000").unwrap();
        assert!((measured(&mut load, "MEAS:VOLT?") - 0.6).abs() < 1e-12);
    }

    // --- Protection trip simulation ---

    #[test]
    fn voltage_protection_trips_above_limit() {
        let mut load = SimulatedLoad::new();
        load.write("VOLT:PROT:STAT ON").unwrap();
        load.write("VOLT:PROT 20.000").unwrap();
        load.write("CURR 0.100").unwrap();
        assert_eq!(measured(&mut load, "MEAS:VOLT?"), 25.0);

        load.write("CURR 4.990").unwrap();
        let volts = measured(&mut load, "MEAS:VOLT?");
        assert!(volts < 20.0);
    }

    #[test]
    fn disabled_protection_does_not_trip() {
        let mut load = SimulatedLoad::new();
        load.write("VOLT:PROT 20.000").unwrap();
        load.write("CURR 0.000").unwrap();
        assert!((measured(&mut load, "MEAS:VOLT?") - 25.0).abs() < 1e-12);
    }

    #[test]
    fn current_protection_trips_above_limit() {
        let mut load = SimulatedLoad::new();
        load.write("FUNC VOLT").unwrap();
        load.write("CURR:PROT:STAT ON").unwrap();
        load.write("CURR:PROT 3.000").unwrap();
        load.write("VOLT 0.000").unwrap();
        assert_eq!(measured(&mut load, "MEAS:CURR?"), 8.0);
    }

    proptest! {
        #[test]
        fn current_voltage_round_trip(current in 0.0f64..4.999) {
            let mut load = SimulatedLoad::new();
            load.write(&format!("CURR {}", current)).unwrap();
            let volts = load.query("MEAS:VOLT?").unwrap();

            load.write("FUNC VOLT").unwrap();
            load.write(&format!("VOLT {}", volts)).unwrap();
            let amps: f64 = load.query("MEAS:CURR?").unwrap().parse().unwrap();

            prop_assert!((amps - current).abs() < 1e-6, "{} -> {} -> {}", current, volts, amps);
        }

        #[test]
        fn identical_inputs_identical_answers(current in -1.0f64..6.0) {
            let mut a = SimulatedLoad::new();
            let mut b = SimulatedLoad::new();
            a.write(&format!("CURR {}", current)).unwrap();
            b.write(&format!("CURR {}", current)).unwrap();
            prop_assert_eq!(a.query("MEAS:VOLT?").unwrap(), b.query("MEAS:VOLT?").unwrap());
        }
    }
}
