//! Rotating append-only CSV writer.
//!
//! Rotation key is the session-start UTC stamp in `session` mode, or the
//! sample's UTC date in `daily` mode; a writer (and its header) is created
//! lazily the first time a key is seen and never extended afterward.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use daq_types::{CsvRotation, CsvSinkSettings, DaqError, DaqResult, Sample};
use tracing::info;

use crate::SampleSink;

struct RotationWriter {
    writer: csv::Writer<File>,
    header: Vec<String>,
}

/// CSV sink writing one file per rotation key under `directory/`.
pub struct CsvSink {
    settings: CsvSinkSettings,
    station_id: String,
    session_key: String,
    writers: HashMap<String, RotationWriter>,
}

impl CsvSink {
    pub fn new(settings: CsvSinkSettings, station_id: impl Into<String>) -> Self {
        Self {
            settings,
            station_id: station_id.into(),
            session_key: Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            writers: HashMap::new(),
        }
    }

    /// File paths for every rotation key written so far, used by the FTP
    /// sink to find finished files to upload.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.writers.keys().map(|key| self.path_for_key(key)).collect()
    }

    /// Flushes all open writers to disk.
    pub fn flush(&mut self) -> DaqResult<()> {
        for rotation in self.writers.values_mut() {
            rotation.writer.flush().map_err(DaqError::Io)?;
        }
        Ok(())
    }

    fn rotation_key(&self, sample: &Sample) -> String {
        match self.settings.rotation {
            CsvRotation::Session => self.session_key.clone(),
            CsvRotation::Daily => {
                let datetime = DateTime::<Utc>::from_timestamp(
                    sample.timestamp_ns / 1_000_000_000,
                    (sample.timestamp_ns.rem_euclid(1_000_000_000)) as u32,
                )
                .unwrap_or_else(Utc::now);
                datetime.format("%Y%m%d").to_string()
            }
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let sanitized_station = sanitize(&self.station_id);
        let filename = format!("{}_{}_{}.csv", self.settings.filename_prefix, sanitized_station, key);
        Path::new(&self.settings.directory).join(filename)
    }

    fn writer_for(&mut self, key: &str, sample: &Sample) -> DaqResult<&mut RotationWriter> {
        if !self.writers.contains_key(key) {
            fs::create_dir_all(&self.settings.directory).map_err(DaqError::Io)?;
            let path = self.path_for_key(key);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(DaqError::Io)?;
            let header = header_columns(sample);
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record(&header).map_err(|e| DaqError::SinkWriteFailed {
                sink: "csv".into(),
                message: e.to_string(),
            })?;
            writer.flush().map_err(DaqError::Io)?;
            info!(path = %path.display(), "csv sink opened new rotation file");
            self.writers.insert(key.to_string(), RotationWriter { writer, header });
        }
        Ok(self.writers.get_mut(key).expect("just inserted"))
    }
}

impl SampleSink for CsvSink {
    fn open(&mut self) -> DaqResult<()> {
        fs::create_dir_all(&self.settings.directory).map_err(DaqError::Io)
    }

    fn handle_sample(&mut self, sample: &Sample) -> DaqResult<()> {
        let key = self.rotation_key(sample);
        let columns = sample_columns(sample, &self.settings.decimal);
        let rotation = self.writer_for(&key, sample)?;
        let row: Vec<String> = rotation
            .header
            .iter()
            .map(|col| columns.get(col).cloned().unwrap_or_default())
            .collect();
        rotation
            .writer
            .write_record(&row)
            .map_err(|e| DaqError::SinkWriteFailed {
                sink: "csv".into(),
                message: e.to_string(),
            })?;
        rotation.writer.flush().map_err(DaqError::Io)?;
        Ok(())
    }

    fn close(&mut self) {
        for rotation in self.writers.values_mut() {
            let _ = rotation.writer.flush();
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Column order per the documented row schema: fixed leading columns, then
/// sorted calibrated values, optional measurement, sorted tags, sorted
/// metadata, sorted extra fields.
fn header_columns(sample: &Sample) -> Vec<String> {
    let mut cols = vec!["timestamp".to_string(), "timestamp_ns".to_string(), "channel".to_string()];

    for name in sample.calibrated_values.keys() {
        cols.push(format!("value_{name}"));
    }
    if !sample.metadata.measurement.is_empty() {
        cols.push("measurement".to_string());
    }
    for key in sample.metadata.tags.keys() {
        cols.push(format!("tag_{key}"));
    }
    for key in meta_entries(sample).keys() {
        cols.push(format!("meta_{key}"));
    }
    for key in sample.metadata.fields.keys() {
        cols.push(format!("extra_{key}"));
    }
    cols
}

fn meta_entries(sample: &Sample) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    meta.insert("station_id".to_string(), sample.metadata.station_id.clone());
    meta.insert("sensor_name".to_string(), sample.metadata.sensor_name.clone());
    meta.insert("unit".to_string(), sample.metadata.unit.clone());
    for (key, value) in &sample.metadata.extra {
        meta.insert(key.clone(), value.clone());
    }
    meta
}

/// Builds a `column name -> cell value` map for one sample. Columns the
/// sample doesn't carry are simply absent, so a pinned header renders them
/// blank; columns the sample carries but the header doesn't are dropped.
fn sample_columns(sample: &Sample, decimal: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let datetime = DateTime::<Utc>::from_timestamp(
        sample.timestamp_ns.div_euclid(1_000_000_000),
        sample.timestamp_ns.rem_euclid(1_000_000_000) as u32,
    );
    out.insert(
        "timestamp".to_string(),
        datetime.map(|d| d.to_rfc3339()).unwrap_or_default(),
    );
    out.insert("timestamp_ns".to_string(), sample.timestamp_ns.to_string());
    out.insert("channel".to_string(), sample.channel.to_string());

    for (name, value) in &sample.calibrated_values {
        out.insert(format!("value_{name}"), format_float(*value, decimal));
    }
    if !sample.metadata.measurement.is_empty() {
        out.insert("measurement".to_string(), sample.metadata.measurement.clone());
    }
    for (key, value) in &sample.metadata.tags {
        out.insert(format!("tag_{key}"), value.clone());
    }
    for (key, value) in meta_entries(sample) {
        out.insert(format!("meta_{key}"), value);
    }
    for (key, value) in &sample.metadata.fields {
        out.insert(format!("extra_{key}"), format_field(value, decimal));
    }
    out
}

fn format_float(value: f64, decimal: &str) -> String {
    let formatted = daq_types::format_float_g15(value);
    if decimal == "." {
        formatted
    } else {
        formatted.replace('.', decimal)
    }
}

fn format_field(value: &daq_types::FieldValue, decimal: &str) -> String {
    use daq_types::FieldValue;
    match value {
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(i) => i.to_string(),
        FieldValue::Float(f) => format_float(*f, decimal),
        FieldValue::Str(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_types::SampleMetadata;
    use tempfile::tempdir;

    fn sample_with(channel: usize, ts: i64, value: f64) -> Sample {
        let mut calibrated = BTreeMap::new();
        calibrated.insert("lvdt".to_string(), value);
        Sample::new(
            channel,
            ts,
            calibrated,
            SampleMetadata {
                measurement: "lvdt".into(),
                tags: Default::default(),
                station_id: "station-01".into(),
                sensor_name: "LVDT".into(),
                unit: "mm".into(),
                fields: Default::default(),
                extra: Default::default(),
            },
        )
    }

    #[test]
    fn header_is_pinned_on_first_row() {
        let dir = tempdir().unwrap();
        let settings = CsvSinkSettings {
            directory: dir.path().to_string_lossy().to_string(),
            rotation: CsvRotation::Session,
            filename_prefix: "acq".into(),
            decimal: ".".into(),
        };
        let mut sink = CsvSink::new(settings, "station-01");
        sink.open().unwrap();
        sink.handle_sample(&sample_with(0, 0, 1.0)).unwrap();

        let mut extra_sample = sample_with(0, 1_000_000, 2.0);
        extra_sample.metadata.extra.insert("added_later".into(), "x".into());
        sink.handle_sample(&extra_sample).unwrap();

        let paths = sink.file_paths();
        assert_eq!(paths.len(), 1);
        let contents = fs::read_to_string(&paths[0]).unwrap();
        let mut lines = contents.lines();
        let header = lines.next().unwrap();
        assert!(!header.contains("meta_added_later"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn daily_rotation_splits_by_utc_date() {
        let dir = tempdir().unwrap();
        let settings = CsvSinkSettings {
            directory: dir.path().to_string_lossy().to_string(),
            rotation: CsvRotation::Daily,
            filename_prefix: "acq".into(),
            decimal: ".".into(),
        };
        let mut sink = CsvSink::new(settings, "station-01");
        sink.open().unwrap();
        sink.handle_sample(&sample_with(0, 0, 1.0)).unwrap();
        sink.handle_sample(&sample_with(0, 86_400 * 1_000_000_000, 2.0)).unwrap();
        assert_eq!(sink.file_paths().len(), 2);
    }
}
