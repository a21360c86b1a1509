//! Measured points of an I-V curve.

use std::ops::Index;

/// Two readings closer than this in both voltage and current are the same point.
pub const DUPLICATE_TOLERANCE: f64 = 1e-4;

/// One voltage/current reading and the power it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl Sample {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current, power: voltage * current }
    }

    /// A sample whose power was recorded separately, e.g. loaded from a file.
    pub fn with_power(voltage: f64, current: f64, power: f64) -> Self {
        Self { voltage, current, power }
    }

    fn is_duplicate_of(&self, other: &Sample) -> bool {
        (self.voltage - other.voltage).abs() <= DUPLICATE_TOLERANCE
            && (self.current - other.current).abs() <= DUPLICATE_TOLERANCE
    }
}

/// Samples in acquisition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps samples as recorded, without duplicate suppression.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Appends `sample` unless it repeats the last appended sample within
    /// [`DUPLICATE_TOLERANCE`]. Returns whether the sample was appended.
    pub fn push(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.samples.last() {
            if sample.is_duplicate_of(last) {
                return false;
            }
        }
        self.samples.push(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }

    pub fn currents(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.current).collect()
    }

    pub fn powers(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power).collect()
    }
}

impl Index<usize> for SampleSet {
    type Output = Sample;

    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn power_is_product() {
        let sample = Sample::new(10.0, 4.0);
        assert_eq!(sample.power, 40.0);
    }

    #[test]
    fn near_duplicates_are_suppressed() {
        let mut set = SampleSet::new();
        assert!(set.push(Sample::new(10.0, 2.0)));
        assert!(!set.push(Sample::new(10.00005, 2.00005)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn change_in_either_quantity_is_kept() {
        let mut set = SampleSet::new();
        set.push(Sample::new(10.0, 2.0));
        assert!(set.push(Sample::new(10.0, 2.001)));
        assert!(set.push(Sample::new(10.001, 2.001)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn only_last_sample_is_compared() {
        let mut set = SampleSet::new();
        set.push(Sample::new(1.0, 1.0));
        set.push(Sample::new(2.0, 1.0));
        assert!(set.push(Sample::new(1.0, 1.0)));
        assert_eq!(set.voltages(), vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn columns_follow_acquisition_order() {
        let set = SampleSet::from_samples(vec![Sample::new(0.0, 5.0), Sample::new(10.0, 4.0)]);
        assert_eq!(set.currents(), vec![5.0, 4.0]);
        assert_eq!(set.powers(), vec![0.0, 40.0]);
        assert_eq!(set[1].voltage, 10.0);
    }

    proptest! {
        #[test]
        fn repeated_reads_do_not_grow(v in -50.0f64..50.0, i in -10.0f64..10.0, dv in -5e-5f64..5e-5, di in -5e-5f64..5e-5) {
            let mut set = SampleSet::new();
            set.push(Sample::new(v, i));
            set.push(Sample::new(v + dv, i + di));
            set.push(Sample::new(v, i));
            prop_assert_eq!(set.len(), 1);
        }
    }
}
