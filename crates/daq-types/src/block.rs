//! Block-shaped data as it moves from the board driver through calibration.

use std::collections::BTreeMap;

/// One driver read: `N` timestamped samples per configured channel, still in raw volts.
#[derive(Debug, Clone)]
pub struct AcquisitionBlock {
    pub timestamps_ns: Vec<i64>,
    pub values_by_channel: BTreeMap<usize, Vec<f64>>,
    pub captured_at_ns: i64,
}

impl AcquisitionBlock {
    pub fn len(&self) -> usize {
        self.timestamps_ns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps_ns.is_empty()
    }

    /// Truncates every channel and the timestamp vector to `len`, used when a
    /// sample budget ends mid-block.
    pub fn truncate(&mut self, len: usize) {
        self.timestamps_ns.truncate(len);
        for values in self.values_by_channel.values_mut() {
            values.truncate(len);
        }
    }
}

/// One channel's worth of calibrated data destined for a preview subscriber.
#[derive(Debug, Clone)]
pub struct CalibratedChannelBlock {
    pub index: usize,
    pub name: String,
    pub unit: String,
    pub values: Vec<f64>,
}

/// A calibrated block mirrored to the preview path; carries channel identity so
/// the preview streamer can select/label channels without consulting config.
#[derive(Debug, Clone)]
pub struct CalibratedBlock {
    pub station_id: String,
    pub timestamps_ns: Vec<i64>,
    pub captured_at_ns: i64,
    pub channels: Vec<CalibratedChannelBlock>,
}
