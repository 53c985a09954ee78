//! Station and storage configuration, validated at load time.
//!
//! Shapes mirror the YAML schema this pipeline was distilled from; validation
//! happens once, eagerly, rather than being re-checked on every access.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{DaqError, DaqResult};

/// The bipolar voltage ranges the board hardware supports, per spec §3.
const VALID_VOLTAGE_RANGES: [f64; 4] = [1.0, 2.0, 5.0, 10.0];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    pub index: usize,
    pub name: String,
    pub unit: String,
    pub voltage_range: f64,
    #[serde(default)]
    pub calibration: Calibration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AcquisitionSettings {
    pub sample_rate_hz: f64,
    pub block_size: usize,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub total_samples: Option<u64>,
    #[serde(default)]
    pub drift_correction_threshold_ns: Option<i64>,
}

impl AcquisitionSettings {
    /// Integer nanoseconds between consecutive samples, matching the Python
    /// original's `int(1e9 / sample_rate_hz)`.
    pub fn ts_step_ns(&self) -> i64 {
        (1_000_000_000.0 / self.sample_rate_hz) as i64
    }

    fn validate(&self) -> DaqResult<()> {
        if self.sample_rate_hz <= 0.0 {
            return Err(DaqError::ConfigInvalid {
                message: "sample_rate_hz must be > 0".into(),
            });
        }
        if self.block_size == 0 {
            return Err(DaqError::ConfigInvalid {
                message: "block_size must be >= 1".into(),
            });
        }
        if matches!(self.duration_s, Some(d) if d <= 0.0) {
            return Err(DaqError::ConfigInvalid {
                message: "duration_s must be > 0 when set".into(),
            });
        }
        if matches!(self.total_samples, Some(n) if n == 0) {
            return Err(DaqError::ConfigInvalid {
                message: "total_samples must be > 0 when set".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StationConfig {
    pub station_id: String,
    pub acquisition: AcquisitionSettings,
    pub channels: Vec<ChannelConfig>,
}

impl StationConfig {
    pub fn validate(&self) -> DaqResult<()> {
        if self.station_id.trim().is_empty() {
            return Err(DaqError::ConfigInvalid {
                message: "station_id must not be empty".into(),
            });
        }
        self.acquisition.validate()?;

        let mut seen = HashSet::new();
        let mut voltage_range = None;
        for ch in &self.channels {
            if !VALID_VOLTAGE_RANGES
                .iter()
                .any(|r| (r - ch.voltage_range).abs() < f64::EPSILON)
            {
                return Err(DaqError::ConfigInvalid {
                    message: format!(
                        "channel {} has voltage_range {} outside the supported bipolar set {:?}",
                        ch.index, ch.voltage_range, VALID_VOLTAGE_RANGES
                    ),
                });
            }
            if !seen.insert(ch.index) {
                return Err(DaqError::ConfigInvalid {
                    message: format!("duplicate channel index {}", ch.index),
                });
            }
            match voltage_range {
                None => voltage_range = Some(ch.voltage_range),
                Some(r) if (r - ch.voltage_range).abs() > f64::EPSILON => {
                    return Err(DaqError::ConfigInvalid {
                        message: "all channels must share one voltage_range per scan".into(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn from_yaml(s: &str) -> DaqResult<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvRotation {
    Session,
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CsvSinkSettings {
    pub directory: String,
    #[serde(default = "default_rotation")]
    pub rotation: CsvRotation,
    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
    #[serde(default = "default_decimal")]
    pub decimal: String,
}

fn default_rotation() -> CsvRotation {
    CsvRotation::Session
}
fn default_prefix() -> String {
    "acquisition".into()
}
fn default_decimal() -> String {
    ".".into()
}

impl Default for CsvSinkSettings {
    fn default() -> Self {
        Self {
            directory: "./data".into(),
            rotation: default_rotation(),
            filename_prefix: default_prefix(),
            decimal: default_decimal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FtpProtocol {
    Ftp,
    Sftp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FtpRotation {
    Session,
    Periodic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FtpSinkSettings {
    pub protocol: FtpProtocol,
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_directory: String,
    #[serde(default = "default_ftp_rotation")]
    pub rotation: FtpRotation,
    #[serde(default)]
    pub upload_interval_s: Option<f64>,
}

fn default_ftp_port() -> u16 {
    21
}
fn default_ftp_rotation() -> FtpRotation {
    FtpRotation::Session
}

impl FtpSinkSettings {
    fn validate(&self) -> DaqResult<()> {
        if self.rotation == FtpRotation::Periodic
            && !matches!(self.upload_interval_s, Some(s) if s > 0.0)
        {
            return Err(DaqError::ConfigInvalid {
                message: "upload_interval_s must be > 0 for periodic rotation".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_s: f64,
    #[serde(default)]
    pub max_backoff_s: Option<f64>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> f64 {
    0.5
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_s: default_base_delay(),
            max_backoff_s: Some(30.0),
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> DaqResult<()> {
        if self.max_attempts == 0 {
            return Err(DaqError::ConfigInvalid {
                message: "max_attempts must be >= 1".into(),
            });
        }
        if self.base_delay_s < 0.0 {
            return Err(DaqError::ConfigInvalid {
                message: "base_delay_s must be >= 0".into(),
            });
        }
        if matches!(self.max_backoff_s, Some(m) if m < 0.0) {
            return Err(DaqError::ConfigInvalid {
                message: "max_backoff_s must be >= 0 when set".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageSettings {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub sinks: Vec<String>,
    #[serde(default)]
    pub csv: Option<CsvSinkSettings>,
    #[serde(default)]
    pub ftp: Option<FtpSinkSettings>,
}

fn default_driver() -> String {
    "influxdb_v2".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_timeout_s() -> f64 {
    5.0
}
fn default_queue_max_size() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

impl StorageSettings {
    /// The sink list to actually build: the configured list, or `[driver]` if empty.
    pub fn effective_sinks(&self) -> Vec<String> {
        if self.sinks.is_empty() {
            vec![self.driver.clone()]
        } else {
            self.sinks.clone()
        }
    }

    pub fn validate(&self) -> DaqResult<()> {
        if self.batch_size == 0 {
            return Err(DaqError::ConfigInvalid {
                message: "batch_size must be >= 1".into(),
            });
        }
        if self.timeout_s <= 0.0 {
            return Err(DaqError::ConfigInvalid {
                message: "timeout_s must be > 0".into(),
            });
        }
        if self.queue_max_size == 0 {
            return Err(DaqError::ConfigInvalid {
                message: "queue_max_size must be >= 1".into(),
            });
        }
        self.retry.validate()?;
        if let Some(ftp) = &self.ftp {
            ftp.validate()?;
        }
        Ok(())
    }

    pub fn from_yaml(s: &str) -> DaqResult<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_channel_indices() {
        let cfg = StationConfig {
            station_id: "station-01".into(),
            acquisition: AcquisitionSettings {
                sample_rate_hz: 1000.0,
                block_size: 100,
                duration_s: None,
                total_samples: None,
                drift_correction_threshold_ns: None,
            },
            channels: vec![
                ChannelConfig {
                    index: 0,
                    name: "a".into(),
                    unit: "mm".into(),
                    voltage_range: 10.0,
                    calibration: Calibration::default(),
                },
                ChannelConfig {
                    index: 0,
                    name: "b".into(),
                    unit: "mm".into(),
                    voltage_range: 10.0,
                    calibration: Calibration::default(),
                },
            ],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_voltage_range_outside_bipolar_set() {
        let cfg = StationConfig {
            station_id: "station-01".into(),
            acquisition: AcquisitionSettings {
                sample_rate_hz: 1000.0,
                block_size: 100,
                duration_s: None,
                total_samples: None,
                drift_correction_threshold_ns: None,
            },
            channels: vec![ChannelConfig {
                index: 0,
                name: "a".into(),
                unit: "mm".into(),
                voltage_range: 3.0,
                calibration: Calibration::default(),
            }],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_mixed_voltage_ranges() {
        let cfg = StationConfig {
            station_id: "station-01".into(),
            acquisition: AcquisitionSettings {
                sample_rate_hz: 1000.0,
                block_size: 100,
                duration_s: None,
                total_samples: None,
                drift_correction_threshold_ns: None,
            },
            channels: vec![
                ChannelConfig {
                    index: 0,
                    name: "a".into(),
                    unit: "mm".into(),
                    voltage_range: 10.0,
                    calibration: Calibration::default(),
                },
                ChannelConfig {
                    index: 1,
                    name: "b".into(),
                    unit: "mm".into(),
                    voltage_range: 5.0,
                    calibration: Calibration::default(),
                },
            ],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ts_step_matches_integer_division() {
        let acq = AcquisitionSettings {
            sample_rate_hz: 1000.0,
            block_size: 10,
            duration_s: None,
            total_samples: None,
            drift_correction_threshold_ns: None,
        };
        assert_eq!(acq.ts_step_ns(), 1_000_000);
    }

    #[test]
    fn empty_sinks_defaults_to_driver() {
        let storage = StorageSettings {
            driver: "influxdb_v2".into(),
            url: "http://localhost:8086".into(),
            org: "org".into(),
            bucket: "bucket".into(),
            token: "secret".into(),
            batch_size: default_batch_size(),
            timeout_s: default_timeout_s(),
            queue_max_size: default_queue_max_size(),
            verify_ssl: true,
            retry: RetrySettings::default(),
            sinks: vec![],
            csv: None,
            ftp: None,
        };
        assert_eq!(storage.effective_sinks(), vec!["influxdb_v2".to_string()]);
    }
}
