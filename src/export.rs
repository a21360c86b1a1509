//! CSV persistence of sweeps and loading of recorded curves for comparison.
//!
//! A sweep file holds one `Current (A),Voltage (V),Power (W)` row per sample
//! in acquisition order, a blank line, then a `Parameter,Value` block
//! describing how the sweep was taken.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::analysis::CurveRecord;
use crate::config::{SenseMode, SweepConfig, SweepMode};
use crate::samples::{Sample, SampleSet};
use crate::sink::PersistenceSink;
use crate::sweep::SweepResult;

pub const CURRENT_COLUMN: &str = "Current (A)";
pub const VOLTAGE_COLUMN: &str = "Voltage (V)";
pub const POWER_COLUMN: &str = "Power (W)";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("no valid data rows in {}", .0.display())]
    NoData(PathBuf),
}

/// Parameters recorded next to the samples of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepMetadata {
    pub mode: SweepMode,
    pub sense: SenseMode,
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub voltage_limit: Option<f64>,
    pub current_limit: Option<f64>,
    pub settle_delay_s: f64,
    pub instrument: String,
    pub timestamp: DateTime<Local>,
}

impl SweepMetadata {
    pub fn new(config: &SweepConfig, instrument: &str) -> Self {
        Self {
            mode: config.mode,
            sense: config.sense,
            start: config.start,
            end: config.end,
            step: config.step,
            voltage_limit: config.voltage_limit,
            current_limit: config.current_limit,
            settle_delay_s: config.settle_delay.as_secs_f64(),
            instrument: instrument.to_string(),
            timestamp: Local::now(),
        }
    }

    /// `Parameter,Value` rows in file order. Absent limits are empty values.
    pub fn rows(&self) -> Vec<(String, String)> {
        let unit = self.mode.unit();
        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        vec![
            (String::from("Mode"), self.mode.label().to_string()),
            (String::from("Sense"), self.sense.label().to_string()),
            (format!("Start ({})", unit), self.start.to_string()),
            (format!("End ({})", unit), self.end.to_string()),
            (format!("Step ({})", unit), self.step.to_string()),
            (String::from("Voltage Limit (V)"), optional(self.voltage_limit)),
            (String::from("Current Limit (A)"), optional(self.current_limit)),
            (String::from("Step Delay (s)"), self.settle_delay_s.to_string()),
            (String::from("Instrument"), self.instrument.clone()),
        ]
    }

    /// `IV_Sweep_CC_4-Wire_20240131_154500.csv`
    pub fn file_name(&self) -> String {
        format!(
            "IV_Sweep_{}_{}_{}.csv",
            self.mode.label(),
            self.sense.label(),
            self.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    /// `<output_dir>/<YYYY-MM-DD>/<file_name>`
    pub fn path_in(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.timestamp.format("%Y-%m-%d").to_string()).join(self.file_name())
    }
}

/// Writes samples followed by the metadata block.
pub fn write_sweep<W: Write>(mut out: W, samples: &SampleSet, metadata: &SweepMetadata) -> Result<(), ExportError> {
    {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut out);
        writer.write_record([CURRENT_COLUMN, VOLTAGE_COLUMN, POWER_COLUMN])?;
        for sample in samples {
            writer.write_record([sample.current.to_string(), sample.voltage.to_string(), sample.power.to_string()])?;
        }
        writer.flush()?;
    }

    out.write_all(b"\n")?;

    {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut out);
        writer.write_record(["Parameter", "Value"])?;
        for (parameter, value) in metadata.rows() {
            writer.write_record([parameter, value])?;
        }
        writer.flush()?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a sweep file under `output_dir`, creating the dated directory.
pub fn save_sweep(output_dir: &Path, samples: &SampleSet, metadata: &SweepMetadata) -> Result<PathBuf, ExportError> {
    let path = metadata.path_in(output_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_sweep(BufWriter::new(File::create(&path)?), samples, metadata)?;
    Ok(path)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim().eq_ignore_ascii_case(name))
}

fn mode_from_file_name(name: &str) -> Option<SweepMode> {
    if name.contains("_CC_") {
        Some(SweepMode::ConstantCurrent)
    } else if name.contains("_CV_") {
        Some(SweepMode::ConstantVoltage)
    } else {
        None
    }
}

fn sense_from_file_name(name: &str) -> Option<SenseMode> {
    if name.contains("_4-Wire_") {
        Some(SenseMode::FourWire)
    } else if name.contains("_2-Wire_") {
        Some(SenseMode::TwoWire)
    } else {
        None
    }
}

fn range(values: impl Iterator<Item = f64>) -> f64 {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| (min.min(v), max.max(v)));
    if max >= min {
        max - min
    } else {
        0.0
    }
}

/// A curve swept in voltage spans more volts than amps.
fn mode_from_data(samples: &SampleSet) -> SweepMode {
    let voltage_range = range(samples.iter().map(|s| s.voltage));
    let current_range = range(samples.iter().map(|s| s.current));
    if voltage_range > current_range {
        SweepMode::ConstantVoltage
    } else {
        SweepMode::ConstantCurrent
    }
}

/// Loads a recorded curve.
///
/// Rows with missing or non-numeric values are skipped, as are rows where
/// current, voltage and power are all zero. Mode and sense are taken from
/// the file name when it carries them, then from the metadata block; mode
/// falls back to the shape of the data.
pub fn read_curve(path: &Path) -> Result<CurveRecord, ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let current_idx = column_index(&headers, CURRENT_COLUMN);
    let voltage_idx = column_index(&headers, VOLTAGE_COLUMN);
    let power_idx = column_index(&headers, POWER_COLUMN);

    let (current_idx, voltage_idx, power_idx) = match (current_idx, voltage_idx, power_idx) {
        (Some(c), Some(v), Some(p)) => (c, v, p),
        _ => {
            let missing = [(CURRENT_COLUMN, current_idx), (VOLTAGE_COLUMN, voltage_idx), (POWER_COLUMN, power_idx)]
                .iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(ExportError::MissingColumns(missing));
        }
    };

    let mut samples = Vec::new();
    let mut recorded_mode = None;
    let mut recorded_sense = None;

    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

        match field(0) {
            "Mode" => recorded_mode = field(1).parse::<SweepMode>().ok(),
            "Sense" => recorded_sense = field(1).parse::<SenseMode>().ok(),
            _ => {}
        }

        let parsed = (field(current_idx).parse::<f64>(), field(voltage_idx).parse::<f64>(), field(power_idx).parse::<f64>());
        let (Ok(current), Ok(voltage), Ok(power)) = parsed else {
            continue;
        };
        if current == 0.0 && voltage == 0.0 && power == 0.0 {
            continue;
        }
        samples.push(Sample::with_power(voltage, current, power));
    }

    if samples.is_empty() {
        return Err(ExportError::NoData(path.to_path_buf()));
    }
    let samples = SampleSet::from_samples(samples);

    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mode = mode_from_file_name(&label)
        .or(recorded_mode)
        .unwrap_or_else(|| mode_from_data(&samples));
    let sense = sense_from_file_name(&label).or(recorded_sense);

    debug!("loaded {} samples from {} ({} {:?})", samples.len(), path.display(), mode, sense);

    Ok(CurveRecord { label, path: Some(path.to_path_buf()), samples, mode, sense })
}

fn collect_csv_files(dir: &Path, found: &mut Vec<(SystemTime, PathBuf)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_csv_files(&path, found)?;
        } else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            let modified = entry.metadata()?.modified()?;
            found.push((modified, path));
        }
    }
    Ok(())
}

/// Every `.csv` below `dir`, newest first. A missing directory has none.
pub fn list_recent(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    collect_csv_files(dir, &mut found)?;
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Saves every sweep that collected data as a dated CSV file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    output_dir: PathBuf,
}

impl CsvSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }
}

impl PersistenceSink for CsvSink {
    fn persist(&mut self, result: &SweepResult, metadata: &SweepMetadata) -> Result<Option<PathBuf>, ExportError> {
        if result.samples.is_empty() {
            info!("no samples collected, nothing saved");
            return Ok(None);
        }
        save_sweep(&self.output_dir, &result.samples, metadata).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metadata() -> SweepMetadata {
        let config = SweepConfig::new(SweepMode::ConstantCurrent, 0.0, 5.0, 0.5)
            .with_voltage_limit(26.0)
            .with_sense(SenseMode::FourWire)
            .with_settle_delay(Duration::from_millis(250));
        SweepMetadata::new(&config, "Simulated Instrument")
    }

    fn samples() -> SampleSet {
        SampleSet::from_samples(vec![Sample::new(0.0, 5.0), Sample::new(10.0, 4.0), Sample::new(20.0, 0.5)])
    }

    // --- Writing ---

    #[test]
    fn file_layout() {
        let mut out = Vec::new();
        write_sweep(&mut out, &samples(), &metadata()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Current (A),Voltage (V),Power (W)");
        assert_eq!(lines[2], "4,10,40");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "Parameter,Value");
        assert_eq!(lines[6], "Mode,CC");
        assert_eq!(lines[7], "Sense,4-Wire");
        assert_eq!(lines[8], "Start (A),0");
        assert!(lines.contains(&"Voltage Limit (V),26"));
        assert!(lines.contains(&"Current Limit (A),"));
        assert!(lines.contains(&"Step Delay (s),0.25"));
        assert_eq!(lines.last(), Some(&"Instrument,Simulated Instrument"));
    }

    #[test]
    fn dated_path() {
        let metadata = metadata();
        let path = metadata.path_in(Path::new("out"));
        let date = metadata.timestamp.format("%Y-%m-%d").to_string();
        assert!(path.starts_with(Path::new("out").join(date)));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("IV_Sweep_CC_4-Wire_"));
        assert!(name.ends_with(".csv"));
    }

    // --- Reading ---

    #[test]
    fn saved_sweep_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_sweep(dir.path(), &samples(), &metadata()).unwrap();

        let record = read_curve(&path).unwrap();
        assert_eq!(record.samples, samples());
        assert_eq!(record.mode, SweepMode::ConstantCurrent);
        assert_eq!(record.sense, Some(SenseMode::FourWire));
        assert_eq!(record.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn bad_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.csv");
        fs::write(&path, "Current (A),Voltage (V),Power (W)\n0,0,0\n1,abc,2\n2,\n3,10,30\n").unwrap();

        let record = read_curve(&path).unwrap();
        assert_eq!(record.samples.len(), 1);
        assert_eq!(record.samples[0], Sample::with_power(10.0, 3.0, 30.0));
        assert_eq!(record.sense, None);
    }

    #[test]
    fn missing_columns_are_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.csv");
        fs::write(&path, "Current (A),Volts\n1,2\n").unwrap();

        match read_curve(&path) {
            Err(ExportError::MissingColumns(missing)) => {
                assert_eq!(missing, vec![String::from(VOLTAGE_COLUMN), String::from(POWER_COLUMN)])
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn file_without_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "Current (A),Voltage (V),Power (W)\n0,0,0\n").unwrap();
        assert!(matches!(read_curve(&path), Err(ExportError::NoData(_))));
    }

    #[test]
    fn mode_inference_order() {
        let dir = tempfile::tempdir().unwrap();
        // voltage spans far more than current: looks like CV
        let body = "Current (A),Voltage (V),Power (W)\n1,0,0.1\n0.9,20,18\n";

        let named = dir.path().join("IV_Sweep_CC_2-Wire_20240101_000000.csv");
        fs::write(&named, body).unwrap();
        let record = read_curve(&named).unwrap();
        assert_eq!(record.mode, SweepMode::ConstantCurrent);
        assert_eq!(record.sense, Some(SenseMode::TwoWire));

        let unnamed = dir.path().join("bench.csv");
        fs::write(&unnamed, body).unwrap();
        assert_eq!(read_curve(&unnamed).unwrap().mode, SweepMode::ConstantVoltage);

        let with_block = dir.path().join("bench2.csv");
        fs::write(&with_block, format!("{}\nParameter,Value\nMode,CC\nSense,4-Wire\n", body)).unwrap();
        let record = read_curve(&with_block).unwrap();
        assert_eq!(record.mode, SweepMode::ConstantCurrent);
        assert_eq!(record.sense, Some(SenseMode::FourWire));
    }

    // --- Listing and sink ---

    #[test]
    fn recent_files_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024-01-02");
        fs::create_dir_all(&nested).unwrap();
        let old = dir.path().join("old.csv");
        let new = nested.join("new.csv");
        fs::write(&old, "").unwrap();
        fs::write(&new, "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let now = SystemTime::now();
        File::options().write(true).open(&old).unwrap().set_modified(now - Duration::from_secs(3600)).unwrap();
        File::options().write(true).open(&new).unwrap().set_modified(now).unwrap();

        assert_eq!(list_recent(dir.path()).unwrap(), vec![new, old]);
        assert!(list_recent(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn csv_sink_skips_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());
        let empty = SweepResult {
            samples: SampleSet::new(),
            stopped: crate::sweep::StopReason::UserRequested,
            max_power: None,
            steps_planned: 4,
        };
        assert_eq!(sink.persist(&empty, &metadata()).unwrap(), None);
        assert!(list_recent(dir.path()).unwrap().is_empty());
    }
}
