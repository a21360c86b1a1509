//! Photovoltaic figures of merit derived from a measured curve, and the
//! collection of recorded curves used for side-by-side comparison.

use std::fmt::Write;
use std::path::PathBuf;

use crate::config::{SenseMode, SweepMode};
use crate::samples::{Sample, SampleSet};

/// Maximum-power point of a curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxPowerPoint {
    pub pmp: f64,
    pub vmp: f64,
    pub imp: f64,
}

/// Figures of merit used when comparing curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveStatistics {
    pub max_power: MaxPowerPoint,
    /// Voltage where |current| is smallest.
    pub voc: f64,
    /// |current| where voltage is smallest.
    pub isc: f64,
    /// Percent.
    pub fill_factor: f64,
}

// Index of the first element for which `better` holds against every earlier
// candidate.
fn first_index_by(values: impl Iterator<Item = f64>, better: impl Fn(f64, f64) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in values.enumerate() {
        match best {
            Some((_, current)) if !better(value, current) => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Highest-power sample of a curve as recorded (signs untouched). Ties go to
/// the earliest sample. `None` when there is no data.
pub fn max_power_point(samples: &[Sample]) -> Option<MaxPowerPoint> {
    let index = first_index_by(samples.iter().map(|s| s.power), |a, b| a > b)?;
    let sample = &samples[index];
    Some(MaxPowerPoint { pmp: sample.power, vmp: sample.voltage, imp: sample.current })
}

/// `Pmp / (Voc·Isc) · 100`, or 0 when `Voc·Isc` is not positive.
pub fn fill_factor(pmp: f64, voc: f64, isc: f64) -> f64 {
    let product = voc * isc;
    if product > 0.0 {
        pmp / product * 100.0
    } else {
        0.0
    }
}

/// Comparison statistics. Current and power are taken as absolute values so
/// curves recorded with either sign convention line up. `None` when there is
/// no data.
pub fn curve_statistics(samples: &[Sample]) -> Option<CurveStatistics> {
    let max_index = first_index_by(samples.iter().map(|s| s.power.abs()), |a, b| a > b)?;
    let min_current_index = first_index_by(samples.iter().map(|s| s.current.abs()), |a, b| a < b)?;
    let min_voltage_index = first_index_by(samples.iter().map(|s| s.voltage), |a, b| a < b)?;

    let max_power = MaxPowerPoint {
        pmp: samples[max_index].power.abs(),
        vmp: samples[max_index].voltage,
        imp: samples[max_index].current.abs(),
    };
    let voc = samples[min_current_index].voltage;
    let isc = samples[min_voltage_index].current.abs();

    Some(CurveStatistics { max_power, voc, isc, fill_factor: fill_factor(max_power.pmp, voc, isc) })
}

/// A recorded curve loaded for comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveRecord {
    pub label: String,
    pub path: Option<PathBuf>,
    pub samples: SampleSet,
    pub mode: SweepMode,
    pub sense: Option<SenseMode>,
}

impl CurveRecord {
    pub fn new(label: &str, samples: SampleSet, mode: SweepMode, sense: Option<SenseMode>) -> Self {
        Self { label: label.to_string(), path: None, samples, mode, sense }
    }

    /// `CC 4-Wire`, `CV Unknown`, ...
    pub fn legend(&self) -> String {
        format!("{} {}", self.mode, self.sense.map(|s| s.label()).unwrap_or("Unknown"))
    }

    pub fn statistics(&self) -> Option<CurveStatistics> {
        curve_statistics(self.samples.as_slice())
    }
}

/// The curves currently shown together.
#[derive(Debug, Clone, Default)]
pub struct CurveCollection {
    records: Vec<CurveRecord>,
}

impl CurveCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: CurveRecord) {
        self.records.push(record);
    }

    /// Removes the curve at `index`, returning it if the index was valid.
    pub fn remove(&mut self, index: usize) -> Option<CurveRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CurveRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurveRecord> {
        self.records.iter()
    }

    /// Plain text statistics for every curve in the collection.
    pub fn report(&self) -> String {
        if self.records.is_empty() {
            return String::from("No data loaded\n");
        }

        let mut text = format!("Curve Statistics:\n{}\n\n", "=".repeat(30));
        for (i, record) in self.records.iter().enumerate() {
            // writing into a String cannot fail
            let _ = writeln!(text, "Curve {}: {}", i + 1, record.legend());
            let _ = writeln!(text, "File: {}", record.label);
            match record.statistics() {
                Some(stats) => {
                    let _ = writeln!(text, "Pmp: {:.3} W", stats.max_power.pmp);
                    let _ = writeln!(text, "Vmp: {:.3} V", stats.max_power.vmp);
                    let _ = writeln!(text, "Imp: {:.3} A", stats.max_power.imp);
                    let _ = writeln!(text, "Voc: {:.3} V", stats.voc);
                    let _ = writeln!(text, "Isc: {:.3} A", stats.isc);
                    let _ = writeln!(text, "FF: {:.1}%", stats.fill_factor);
                }
                None => text.push_str("No data\n"),
            }
            let _ = writeln!(text, "{}\n", "-".repeat(25));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_curve() -> Vec<Sample> {
        vec![Sample::new(0.0, 5.0), Sample::new(10.0, 4.0), Sample::new(20.0, 0.0)]
    }

    // --- Maximum power point ---

    #[test]
    fn max_power_point_of_reference_curve() {
        let mpp = max_power_point(&reference_curve()).unwrap();
        assert_eq!(mpp, MaxPowerPoint { pmp: 40.0, vmp: 10.0, imp: 4.0 });
    }

    #[test]
    fn ties_resolve_to_first_sample() {
        let samples = vec![Sample::new(8.0, 5.0), Sample::new(10.0, 4.0), Sample::new(20.0, 2.0)];
        let mpp = max_power_point(&samples).unwrap();
        assert_eq!(mpp.vmp, 8.0);
    }

    #[test]
    fn empty_curve_has_no_max_power_point() {
        assert_eq!(max_power_point(&[]), None);
        assert_eq!(curve_statistics(&[]), None);
    }

    // --- Comparison statistics ---

    #[test]
    fn fill_factor_of_reference_values() {
        assert_eq!(fill_factor(40.0, 20.0, 5.0), 40.0);
        assert_eq!(fill_factor(40.0, 0.0, 5.0), 0.0);
        assert_eq!(fill_factor(40.0, -1.0, 5.0), 0.0);
    }

    #[test]
    fn statistics_of_reference_curve() {
        let stats = curve_statistics(&reference_curve()).unwrap();
        assert_eq!(stats.max_power.pmp, 40.0);
        assert_eq!(stats.voc, 20.0);
        assert_eq!(stats.isc, 5.0);
        assert_eq!(stats.fill_factor, 40.0);
    }

    #[test]
    fn statistics_ignore_current_sign() {
        let samples: Vec<Sample> = reference_curve().iter().map(|s| Sample::new(s.voltage, -s.current)).collect();
        let stats = curve_statistics(&samples).unwrap();
        assert_eq!(stats.max_power, MaxPowerPoint { pmp: 40.0, vmp: 10.0, imp: 4.0 });
        assert_eq!(stats.isc, 5.0);

        // the signed maximum picks a different point
        assert_eq!(max_power_point(&samples).unwrap().pmp, 0.0);
    }

    // --- Collection ---

    #[test]
    fn collection_add_remove_clear() {
        let mut curves = CurveCollection::new();
        curves.add(CurveRecord::new("a.csv", SampleSet::from_samples(reference_curve()), SweepMode::ConstantCurrent, None));
        curves.add(CurveRecord::new("b.csv", SampleSet::new(), SweepMode::ConstantVoltage, Some(SenseMode::FourWire)));
        assert_eq!(curves.len(), 2);

        assert!(curves.remove(5).is_none());
        let removed = curves.remove(0).unwrap();
        assert_eq!(removed.label, "a.csv");
        assert_eq!(curves.get(0).unwrap().legend(), "CV 4-Wire");

        curves.clear();
        assert!(curves.is_empty());
    }

    #[test]
    fn report_lists_every_curve() {
        let mut curves = CurveCollection::new();
        assert_eq!(curves.report(), "No data loaded\n");

        curves.add(CurveRecord::new("a.csv", SampleSet::from_samples(reference_curve()), SweepMode::ConstantCurrent, Some(SenseMode::TwoWire)));
        curves.add(CurveRecord::new("empty.csv", SampleSet::new(), SweepMode::ConstantVoltage, None));
        let report = curves.report();

        assert!(report.contains("Curve 1: CC 2-Wire"));
        assert!(report.contains("File: a.csv"));
        assert!(report.contains("Pmp: 40.000 W"));
        assert!(report.contains("Voc: 20.000 V"));
        assert!(report.contains("FF: 40.0%"));
        assert!(report.contains("Curve 2: CV Unknown"));
        assert!(report.contains("No data"));
    }
}
