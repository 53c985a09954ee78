//! The hardware-facing seam the Acquisition Runner drives.
//!
//! [`BoardDriver`] models the vendor DAQ board: open the device, start a
//! continuous differential scan across channels that share one voltage range,
//! read interleaved blocks back out, and tear down. [`mock::MockBoardDriver`]
//! implements the same interface against a synthetic signal generator so the
//! rest of the pipeline runs without hardware attached.

pub mod mock;

use std::collections::BTreeMap;
use std::time::Duration;

use daq_types::{ChannelConfig, DaqResult};

pub use mock::{MockBoardDriver, MockFault};

/// One continuous-scan read, already de-interleaved per configured channel.
pub type BlockSamples = BTreeMap<usize, Vec<f64>>;

/// Hardware-facing operations the Acquisition Runner drives synchronously on
/// its own thread. `stop_scan`/`cleanup`/`close` must be idempotent and must
/// never fail.
pub trait BoardDriver: Send {
    /// Acquires the board handle. Fails with `DaqError::HardwareUnavailable`
    /// if no board is present.
    fn open(&mut self) -> DaqResult<()>;

    /// Sets differential input mode and starts an open-ended continuous scan.
    /// All channels must share `voltage_range` -- the hardware applies one
    /// global range; fails with `DaqError::ConfigMismatch` otherwise. Returns
    /// the driver-assigned channel mask and the block size the driver will
    /// actually deliver per read.
    fn start_scan(
        &mut self,
        channels: &[ChannelConfig],
        sample_rate_hz: f64,
        voltage_range: f64,
        block_samples: usize,
    ) -> DaqResult<(u32, usize)>;

    /// Blocks until `block_samples` samples per channel are available, or
    /// `timeout` elapses, de-interleaving the driver's row-major layout
    /// (`values[i % num_channels]` -> `channels[i % num_channels]`) into one
    /// vector per configured channel.
    fn read_block(
        &mut self,
        channel_mask: u32,
        block_samples: usize,
        channels: &[ChannelConfig],
        timeout: Duration,
    ) -> DaqResult<BlockSamples>;

    fn stop_scan(&mut self);
    fn cleanup(&mut self);
    fn close(&mut self);
}

/// Default read timeout per the board-driver contract: `block_samples /
/// sample_rate_hz + 0.5s`.
pub fn default_read_timeout(block_samples: usize, sample_rate_hz: f64) -> Duration {
    Duration::from_secs_f64(block_samples as f64 / sample_rate_hz + 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_matches_formula() {
        let t = default_read_timeout(1000, 1000.0);
        assert!((t.as_secs_f64() - 1.5).abs() < 1e-9);
    }
}
