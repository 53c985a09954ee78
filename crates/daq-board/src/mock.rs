//! Deterministic synthetic-signal stand-in for the vendor board driver.
//!
//! Generates a distinct sinusoid per channel index, paced to roughly real
//! time so drift correction and budget termination behave the same as they
//! would against real hardware. Never fails `open()`; a single fault can be
//! injected for test coverage of the Runner's `Overrun`/`Timeout` handling.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use daq_types::{ChannelConfig, DaqError, DaqResult};
use tracing::{info, warn};

use crate::{BlockSamples, BoardDriver};

/// A fault to inject on the next `read_block` call, then clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Overrun,
    Timeout,
}

pub struct MockBoardDriver {
    opened: bool,
    scanning: bool,
    sample_rate_hz: f64,
    samples_emitted: u64,
    started_at: Option<Instant>,
    pending_fault: Option<MockFault>,
}

impl Default for MockBoardDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoardDriver {
    pub fn new() -> Self {
        Self {
            opened: false,
            scanning: false,
            sample_rate_hz: 0.0,
            samples_emitted: 0,
            started_at: None,
            pending_fault: None,
        }
    }

    /// Returns a driver that fails its next `read_block` with `fault`, then
    /// resumes normal operation.
    pub fn with_fault(fault: MockFault) -> Self {
        let mut driver = Self::new();
        driver.pending_fault = Some(fault);
        driver
    }

    fn synth(channel: &ChannelConfig, sample_index: u64, sample_rate_hz: f64) -> f64 {
        let freq_hz = 1.0 + channel.index as f64;
        let t = sample_index as f64 / sample_rate_hz;
        let amplitude = channel.voltage_range / 2.0;
        amplitude * (2.0 * PI * freq_hz * t).sin()
    }
}

impl BoardDriver for MockBoardDriver {
    fn open(&mut self) -> DaqResult<()> {
        self.opened = true;
        info!("mock board opened");
        Ok(())
    }

    fn start_scan(
        &mut self,
        channels: &[ChannelConfig],
        sample_rate_hz: f64,
        voltage_range: f64,
        block_samples: usize,
    ) -> DaqResult<(u32, usize)> {
        for ch in channels {
            if (ch.voltage_range - voltage_range).abs() > f64::EPSILON {
                return Err(DaqError::ConfigMismatch(format!(
                    "channel {} has voltage_range {} but scan was started at {}",
                    ch.index, ch.voltage_range, voltage_range
                )));
            }
        }
        self.sample_rate_hz = sample_rate_hz;
        self.samples_emitted = 0;
        self.started_at = Some(Instant::now());
        self.scanning = true;

        let mask = channels.iter().fold(0u32, |acc, ch| acc | (1 << ch.index));
        info!(
            sample_rate_hz,
            voltage_range,
            block_samples,
            channel_mask = mask,
            "mock continuous scan started"
        );
        Ok((mask, block_samples))
    }

    fn read_block(
        &mut self,
        _channel_mask: u32,
        block_samples: usize,
        channels: &[ChannelConfig],
        _timeout: Duration,
    ) -> DaqResult<BlockSamples> {
        if let Some(fault) = self.pending_fault.take() {
            return match fault {
                MockFault::Overrun => Err(DaqError::Overrun("injected mock overrun".into())),
                MockFault::Timeout => Err(DaqError::Timeout("injected mock timeout".into())),
            };
        }

        // Pace roughly to real time so the wall-clock drift-correction path
        // in the Runner has something realistic to react to.
        if let Some(started_at) = self.started_at {
            let target = Duration::from_secs_f64(self.samples_emitted as f64 / self.sample_rate_hz);
            let elapsed = started_at.elapsed();
            if target > elapsed {
                thread::sleep(target - elapsed);
            }
        }

        let mut out = BTreeMap::new();
        for ch in channels {
            let values: Vec<f64> = (0..block_samples)
                .map(|i| Self::synth(ch, self.samples_emitted + i as u64, self.sample_rate_hz))
                .collect();
            out.insert(ch.index, values);
        }
        self.samples_emitted += block_samples as u64;
        Ok(out)
    }

    fn stop_scan(&mut self) {
        self.scanning = false;
    }

    fn cleanup(&mut self) {
        self.samples_emitted = 0;
        self.started_at = None;
    }

    fn close(&mut self) {
        if self.scanning {
            warn!("mock board closed while still scanning");
            self.scanning = false;
        }
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(index: usize, range: f64) -> ChannelConfig {
        ChannelConfig {
            index,
            name: format!("ch{index}"),
            unit: "V".into(),
            voltage_range: range,
            calibration: Default::default(),
        }
    }

    #[test]
    fn rejects_mixed_voltage_ranges() {
        let mut driver = MockBoardDriver::new();
        let channels = vec![channel(0, 10.0), channel(1, 5.0)];
        let err = driver.start_scan(&channels, 1000.0, 10.0, 10).unwrap_err();
        assert!(matches!(err, DaqError::ConfigMismatch(_)));
    }

    #[test]
    fn read_block_deinterleaves_per_channel() {
        let mut driver = MockBoardDriver::new();
        driver.open().unwrap();
        let channels = vec![channel(0, 10.0), channel(1, 10.0)];
        let (_mask, block_samples) = driver.start_scan(&channels, 100_000.0, 10.0, 4).unwrap();
        let block = driver
            .read_block(_mask, block_samples, &channels, Duration::from_millis(10))
            .unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block[&0].len(), 4);
        assert_eq!(block[&1].len(), 4);
    }

    #[test]
    fn injected_fault_fires_once() {
        let mut driver = MockBoardDriver::with_fault(MockFault::Overrun);
        driver.open().unwrap();
        let channels = vec![channel(0, 10.0)];
        let (mask, block_samples) = driver.start_scan(&channels, 100_000.0, 10.0, 4).unwrap();
        let first = driver.read_block(mask, block_samples, &channels, Duration::from_millis(10));
        assert!(matches!(first, Err(DaqError::Overrun(_))));
        let second = driver.read_block(mask, block_samples, &channels, Duration::from_millis(10));
        assert!(second.is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let mut driver = MockBoardDriver::new();
        driver.open().unwrap();
        driver.close();
        driver.close();
    }
}
