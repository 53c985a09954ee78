//! Shared data types for the acquisition pipeline: samples, blocks,
//! calibration, configuration and the line-protocol wire format.

pub mod block;
pub mod calibration;
pub mod config;
pub mod error;
pub mod line_protocol;
pub mod sample;

pub use block::{AcquisitionBlock, CalibratedBlock, CalibratedChannelBlock};
pub use calibration::Calibration;
pub use config::{
    AcquisitionSettings, ChannelConfig, CsvRotation, CsvSinkSettings, FtpProtocol, FtpRotation,
    FtpSinkSettings, RetrySettings, StationConfig, StorageSettings,
};
pub use error::{DaqError, DaqResult};
pub use line_protocol::{format_float_g15, sample_to_line, to_line};
pub use sample::{FieldValue, Sample, SampleMetadata};
