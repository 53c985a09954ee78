//! Terminal consumers of [`daq_types::Sample`]: the database, CSV and
//! FTP/SFTP sinks the Acquisition Runner fans out to.

pub mod csv_sink;
pub mod database;
pub mod ftp_sink;
mod queue;

pub use csv_sink::CsvSink;
pub use database::DatabaseSink;
pub use ftp_sink::FtpSink;

use daq_types::{DaqResult, Sample};

/// Capability every sink exposes. `open` runs before the first sample,
/// `close` always runs, even on abnormal termination, and must be
/// idempotent: calling it twice is equivalent to calling it once.
pub trait SampleSink: Send {
    fn open(&mut self) -> DaqResult<()>;
    fn handle_sample(&mut self, sample: &Sample) -> DaqResult<()>;
    fn close(&mut self);
}
