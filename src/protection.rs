//! Software protection limits, checked on every measurement before the
//! sample is accepted.

use std::fmt;

use crate::config::SweepConfig;
use crate::samples::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Voltage,
    Current,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Voltage => write!(f, "Voltage"),
            LimitKind::Current => write!(f, "Current"),
        }
    }
}

/// A measurement above a configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{kind} exceeded protection limit ({measured} > {limit})")]
pub struct ProtectionViolation {
    pub kind: LimitKind,
    pub measured: f64,
    pub limit: f64,
}

/// Compares a sample against the limits of `config`. The voltage limit is
/// checked first.
pub fn check(sample: &Sample, config: &SweepConfig) -> Result<(), ProtectionViolation> {
    if let Some(limit) = config.voltage_limit {
        if sample.voltage > limit {
            return Err(ProtectionViolation { kind: LimitKind::Voltage, measured: sample.voltage, limit });
        }
    }
    if let Some(limit) = config.current_limit {
        if sample.current > limit {
            return Err(ProtectionViolation { kind: LimitKind::Current, measured: sample.current, limit });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepMode;

    fn config(voltage_limit: Option<f64>, current_limit: Option<f64>) -> SweepConfig {
        let mut config = SweepConfig::new(SweepMode::ConstantCurrent, 0.0, 5.0, 0.1);
        config.voltage_limit = voltage_limit;
        config.current_limit = current_limit;
        config
    }

    #[test]
    fn within_limits() {
        assert!(check(&Sample::new(19.9, 4.0), &config(Some(20.0), Some(5.0))).is_ok());
        assert!(check(&Sample::new(20.0, 5.0), &config(Some(20.0), Some(5.0))).is_ok());
    }

    #[test]
    fn absent_limits_never_trip() {
        assert!(check(&Sample::new(1e6, 1e6), &config(None, None)).is_ok());
    }

    #[test]
    fn voltage_violation() {
        let violation = check(&Sample::new(25.0, 0.1), &config(Some(20.0), None)).unwrap_err();
        assert_eq!(violation, ProtectionViolation { kind: LimitKind::Voltage, measured: 25.0, limit: 20.0 });
        assert_eq!(violation.to_string(), "Voltage exceeded protection limit (25 > 20)");
    }

    #[test]
    fn current_violation() {
        let violation = check(&Sample::new(1.0, 8.0), &config(Some(20.0), Some(3.0))).unwrap_err();
        assert_eq!(violation.kind, LimitKind::Current);
        assert_eq!(violation.limit, 3.0);
    }
}
