//! Acquisition Runner: drives the block-read loop, reconstructs
//! timestamps, corrects drift, fans calibrated samples out to sinks, and
//! optionally mirrors calibrated blocks to a preview subscriber.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use daq_board::BoardDriver;
use daq_sinks::SampleSink;
use daq_types::{
    AcquisitionBlock, CalibratedBlock, CalibratedChannelBlock, Sample, SampleMetadata,
    StationConfig,
};
use tracing::{error, warn};

use crate::preview::PreviewSender;

/// Acquisition mode; exactly one applies per [`AcquisitionRunner::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    Continuous,
    Timed,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Stopped,
    Failed,
}

pub struct RunSummary {
    pub outcome: RunOutcome,
    pub error: Option<String>,
    pub samples_per_channel: u64,
}

pub fn wall_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Drives one acquisition session from `open()` through `close()`.
/// Consumes itself: a Runner is single-use, matching the Session
/// Manager's one-worker-thread-per-session model.
pub struct AcquisitionRunner {
    station: StationConfig,
    board: Box<dyn BoardDriver>,
    sinks: Vec<Box<dyn SampleSink>>,
    preview_tx: Option<PreviewSender>,
    stop_flag: Arc<AtomicBool>,
}

impl AcquisitionRunner {
    pub fn new(
        station: StationConfig,
        board: Box<dyn BoardDriver>,
        sinks: Vec<Box<dyn SampleSink>>,
        preview_tx: Option<PreviewSender>,
    ) -> Self {
        Self {
            station,
            board,
            sinks,
            preview_tx,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the Session Manager keeps to signal stop from another thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn run(mut self, mode: AcquisitionMode) -> RunSummary {
        let result = self.run_inner(mode);
        self.shutdown();
        if let Some(tx) = &self.preview_tx {
            tx.send_terminal();
        }

        match result {
            Ok(samples_per_channel) => RunSummary {
                outcome: if self.stop_flag.load(Ordering::SeqCst) {
                    RunOutcome::Stopped
                } else {
                    RunOutcome::Finished
                },
                error: None,
                samples_per_channel,
            },
            Err(err) => {
                error!(error = %err, "acquisition runner terminating session");
                RunSummary {
                    outcome: RunOutcome::Failed,
                    error: Some(err.to_string()),
                    samples_per_channel: 0,
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.board.stop_scan();
        self.board.cleanup();
        self.board.close();
        for sink in &mut self.sinks {
            sink.close();
        }
    }

    fn run_inner(&mut self, mode: AcquisitionMode) -> daq_types::DaqResult<u64> {
        self.board.open()?;

        let mut opened_sinks = Vec::new();
        for mut sink in self.sinks.drain(..) {
            match sink.open() {
                Ok(()) => opened_sinks.push(sink),
                Err(err) => error!(error = %err, "sink failed to open, removing from active set"),
            }
        }
        self.sinks = opened_sinks;
        if self.sinks.is_empty() {
            warn!("no active sinks after open; samples will be dropped");
        }

        let voltage_range = self
            .station
            .channels
            .first()
            .map(|c| c.voltage_range)
            .unwrap_or(10.0);
        let (channel_mask, block_samples) = self.board.start_scan(
            &self.station.channels,
            self.station.acquisition.sample_rate_hz,
            voltage_range,
            self.station.acquisition.block_size,
        )?;
        let read_timeout = daq_board::default_read_timeout(
            block_samples,
            self.station.acquisition.sample_rate_hz,
        );

        let mut timestamp_state =
            TimestampState::new(wall_now_ns(), self.station.acquisition.ts_step_ns());
        let mut remaining_samples = self.station.acquisition.total_samples;
        let deadline_ns = self
            .station
            .acquisition
            .duration_s
            .map(|d| wall_now_ns() + (d * 1_000_000_000.0) as i64);
        let drift_threshold = self.station.acquisition.drift_correction_threshold_ns;

        let mut total_emitted: u64 = 0;
        let first_channel_index = self.station.channels.first().map(|c| c.index);

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if let Some(deadline) = deadline_ns {
                if wall_now_ns() >= deadline {
                    break;
                }
            }

            let values_by_channel = self.board.read_block(
                channel_mask,
                block_samples,
                &self.station.channels,
                read_timeout,
            )?;

            let raw_len = first_channel_index
                .and_then(|idx| values_by_channel.get(&idx))
                .map(|v| v.len())
                .unwrap_or(0);
            // `timestamps_ns` is a placeholder until step 6 below recomputes it
            // from `timestamp_state`; it only needs the right length so
            // `AcquisitionBlock::truncate` keeps every field in lockstep.
            let mut block = AcquisitionBlock {
                timestamps_ns: vec![0; raw_len],
                values_by_channel,
                captured_at_ns: wall_now_ns(),
            };
            if block.is_empty() {
                continue;
            }

            if let Some(remaining) = remaining_samples {
                if (block.len() as u64) > remaining {
                    block.truncate(remaining as usize);
                }
            }
            let block_len = block.len();

            let timestamps =
                timestamp_state.advance(block_len, wall_now_ns(), drift_threshold);
            block.timestamps_ns = timestamps;

            self.fan_out(&block.timestamps_ns, &block.values_by_channel, mode);

            total_emitted += block_len as u64;

            if let Some(remaining) = remaining_samples {
                let left = remaining.saturating_sub(block_len as u64);
                remaining_samples = Some(left);
                if left == 0 {
                    break;
                }
            }
            if let Some(deadline) = deadline_ns {
                if wall_now_ns() >= deadline {
                    break;
                }
            }
        }

        Ok(total_emitted)
    }

    fn fan_out(
        &mut self,
        timestamps: &[i64],
        values_by_channel: &BTreeMap<usize, Vec<f64>>,
        mode: AcquisitionMode,
    ) {
        let mut calibrated_channels: Vec<CalibratedChannelBlock> = Vec::new();
        let want_preview = mode == AcquisitionMode::Test && self.preview_tx.is_some();

        for channel in &self.station.channels {
            let Some(raw_values) = values_by_channel.get(&channel.index) else {
                continue;
            };
            let calibrated = channel.calibration.apply_batch(raw_values);

            if want_preview {
                calibrated_channels.push(CalibratedChannelBlock {
                    index: channel.index,
                    name: channel.name.clone(),
                    unit: channel.unit.clone(),
                    values: calibrated.clone(),
                });
            }

            for (i, ts) in timestamps.iter().enumerate() {
                let mut values = BTreeMap::new();
                values.insert(channel.name.clone(), calibrated[i]);
                let sample = Sample::new(
                    channel.index,
                    *ts,
                    values,
                    SampleMetadata {
                        measurement: self.station.station_id.clone(),
                        tags: Default::default(),
                        station_id: self.station.station_id.clone(),
                        sensor_name: channel.name.clone(),
                        unit: channel.unit.clone(),
                        fields: Default::default(),
                        extra: Default::default(),
                    },
                );
                for sink in &mut self.sinks {
                    if let Err(err) = sink.handle_sample(&sample) {
                        warn!(error = %err, "sink failed to handle sample");
                    }
                }
            }
        }

        if want_preview {
            if let Some(tx) = &self.preview_tx {
                tx.send_block(CalibratedBlock {
                    station_id: self.station.station_id.clone(),
                    timestamps_ns: timestamps.to_vec(),
                    captured_at_ns: wall_now_ns(),
                    channels: calibrated_channels,
                });
            }
        }
    }
}

/// Pure timestamp-reconstruction and drift-correction step, factored out of
/// [`AcquisitionRunner`] so the tie-breaking arithmetic can be exercised
/// without a board or sinks.
pub struct TimestampState {
    pub next_ts_ns: i64,
    pub ts_step_ns: i64,
}

impl TimestampState {
    pub fn new(next_ts_ns: i64, ts_step_ns: i64) -> Self {
        Self {
            next_ts_ns,
            ts_step_ns,
        }
    }

    /// Returns the timestamps for a block of `block_len` samples and
    /// advances `next_ts_ns`, snapping to `wall_now_ns_at_block_end +
    /// ts_step` when drift exceeds `drift_threshold_ns`.
    pub fn advance(
        &mut self,
        block_len: usize,
        wall_now_ns_at_block_end: i64,
        drift_threshold_ns: Option<i64>,
    ) -> Vec<i64> {
        let timestamps: Vec<i64> = (0..block_len)
            .map(|i| self.next_ts_ns + i as i64 * self.ts_step_ns)
            .collect();
        let candidate_next = self.next_ts_ns + block_len as i64 * self.ts_step_ns;
        let expected_next = wall_now_ns_at_block_end + self.ts_step_ns;
        let drift = expected_next - candidate_next;
        self.next_ts_ns = match drift_threshold_ns {
            Some(threshold) if drift.abs() > threshold => expected_next,
            _ => candidate_next,
        };
        timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_monotonic_timestamps_across_blocks_without_drift_snap() {
        let mut state = TimestampState::new(1_500_000_000, 1_000_000);
        let mut all = Vec::new();
        for block_len in [4usize, 3, 2] {
            // Wall clock exactly matches the hardware-paced cadence, so the
            // drift check never fires even though a threshold is set.
            let wall_now_at_end = state.next_ts_ns + block_len as i64 * state.ts_step_ns - state.ts_step_ns;
            all.extend(state.advance(block_len, wall_now_at_end, Some(1)));
        }
        assert_eq!(all.len(), 9);
        for pair in all.windows(2) {
            assert_eq!(pair[1] - pair[0], 1_000_000);
        }
    }

    #[test]
    fn drift_beyond_threshold_snaps_to_wall_clock() {
        let mut state = TimestampState::new(0, 1_000_000);
        let _ = state.advance(4, 0, None); // candidate_next = 4_000_000
        assert_eq!(state.next_ts_ns, 4_000_000);

        let mut state = TimestampState::new(0, 1_000_000);
        // Wall clock says the block ended far later than the hardware cadence implies.
        let _ = state.advance(4, 10_000_000, Some(1_000));
        assert_eq!(state.next_ts_ns, 10_000_000 + 1_000_000);
    }
}
