//! Preview channel and streamer: mirrors calibrated blocks from the
//! Acquisition Runner's thread to an async subscriber, with drop-oldest
//! overflow and channel selection/downsampling on the way out.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use daq_types::{CalibratedBlock, ChannelConfig, DaqError, DaqResult};
use tokio::sync::Notify;
use tracing::warn;

/// Event carried on the preview channel: a calibrated block, or the
/// guaranteed end-of-session sentinel.
pub enum PreviewEvent {
    Block(CalibratedBlock),
    Terminal,
}

struct PreviewInner {
    state: Mutex<VecDeque<PreviewEvent>>,
    notify: Notify,
    capacity: usize,
}

/// Producer half, held by the Runner thread. Plain (non-async) push: the
/// Runner never awaits, it only locks a mutex briefly.
#[derive(Clone)]
pub struct PreviewSender {
    inner: Arc<PreviewInner>,
}

/// Consumer half, held by the Preview Streamer.
pub struct PreviewReceiver {
    inner: Arc<PreviewInner>,
}

/// Creates a bounded, single-element-drop preview channel.
pub fn preview_channel(capacity: usize) -> (PreviewSender, PreviewReceiver) {
    let inner = Arc::new(PreviewInner {
        state: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });
    (
        PreviewSender {
            inner: inner.clone(),
        },
        PreviewReceiver { inner },
    )
}

impl PreviewSender {
    pub fn send_block(&self, block: CalibratedBlock) {
        self.push(PreviewEvent::Block(block), false);
    }

    /// Always delivered, even when the channel is full of data frames: a
    /// forced enqueue drops the oldest entry unconditionally.
    pub fn send_terminal(&self) {
        self.push(PreviewEvent::Terminal, true);
    }

    fn push(&self, event: PreviewEvent, force: bool) {
        let mut state = self.inner.state.lock().unwrap();
        if state.len() >= self.inner.capacity {
            state.pop_front();
            if !force {
                warn!("preview channel full, dropped oldest calibrated block");
            }
        }
        state.push_back(event);
        drop(state);
        self.inner.notify.notify_one();
    }
}

impl PreviewReceiver {
    pub async fn recv(&mut self) -> Option<PreviewEvent> {
        loop {
            {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(event) = state.pop_front() {
                    return Some(event);
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

/// Channel selection, downsampling factor and span cap for one preview
/// subscription.
#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub channels: Vec<usize>,
    pub downsample: usize,
    pub max_duration_s: f64,
}

pub struct PreviewChannelFrame {
    pub index: usize,
    pub name: String,
    pub unit: String,
    pub values: Vec<f64>,
}

pub struct PreviewFrame {
    pub station_id: String,
    pub captured_at_ns: i64,
    pub timestamps_ns: Vec<i64>,
    pub channels: Vec<PreviewChannelFrame>,
}

/// Consumes a [`PreviewReceiver`], applying channel selection and
/// downsampling, until a terminal sentinel arrives, the cumulative
/// delivered span reaches `max_duration_s`, or the receiver is dropped.
pub struct PreviewStreamer {
    receiver: PreviewReceiver,
    options: PreviewOptions,
    first_emitted_ts: Option<i64>,
    done: bool,
}

impl PreviewStreamer {
    pub fn new(
        receiver: PreviewReceiver,
        station_channels: &[ChannelConfig],
        options: PreviewOptions,
    ) -> DaqResult<Self> {
        let mut dedup: BTreeSet<usize> = BTreeSet::new();
        for idx in &options.channels {
            dedup.insert(*idx);
        }
        for idx in &dedup {
            if !station_channels.iter().any(|c| c.index == *idx) {
                return Err(DaqError::UnknownChannel(*idx));
            }
        }
        let options = PreviewOptions {
            channels: dedup.into_iter().collect(),
            downsample: options.downsample.max(1),
            max_duration_s: options.max_duration_s,
        };
        Ok(Self {
            receiver,
            options,
            first_emitted_ts: None,
            done: false,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the next preview frame, or `None` once the stream has
    /// terminated (sentinel, span cap, or the sender side was dropped).
    pub async fn next_frame(&mut self) -> Option<PreviewFrame> {
        if self.done {
            return None;
        }
        loop {
            let event = self.receiver.recv().await?;
            let block = match event {
                PreviewEvent::Terminal => {
                    self.done = true;
                    return None;
                }
                PreviewEvent::Block(block) => block,
            };

            let step = self.options.downsample;
            let timestamps: Vec<i64> = block.timestamps_ns.iter().step_by(step).copied().collect();
            if timestamps.is_empty() {
                continue;
            }

            let mut channels = Vec::new();
            for idx in &self.options.channels {
                if let Some(ch) = block.channels.iter().find(|c| c.index == *idx) {
                    let values: Vec<f64> = ch.values.iter().step_by(step).copied().collect();
                    channels.push(PreviewChannelFrame {
                        index: ch.index,
                        name: ch.name.clone(),
                        unit: ch.unit.clone(),
                        values,
                    });
                }
            }
            if channels.is_empty() {
                continue;
            }

            if self.first_emitted_ts.is_none() {
                self.first_emitted_ts = timestamps.first().copied();
            }
            if let (Some(first), Some(last)) = (self.first_emitted_ts, timestamps.last()) {
                let span_ns = (*last - first) as f64;
                if span_ns >= self.options.max_duration_s * 1_000_000_000.0 {
                    self.done = true;
                }
            }

            return Some(PreviewFrame {
                station_id: block.station_id,
                captured_at_ns: block.captured_at_ns,
                timestamps_ns: timestamps,
                channels,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_types::{CalibratedChannelBlock, Calibration};

    fn channel(index: usize, name: &str) -> ChannelConfig {
        ChannelConfig {
            index,
            name: name.into(),
            unit: "mm".into(),
            voltage_range: 10.0,
            calibration: Calibration::default(),
        }
    }

    #[tokio::test]
    async fn downsamples_and_stops_at_span_cap() {
        let (tx, rx) = preview_channel(4);
        let station_channels = vec![channel(0, "A"), channel(1, "B")];
        let options = PreviewOptions {
            channels: vec![1],
            downsample: 2,
            max_duration_s: 2.0,
        };
        let mut streamer = PreviewStreamer::new(rx, &station_channels, options).unwrap();

        let block = CalibratedBlock {
            station_id: "station-01".into(),
            timestamps_ns: vec![0, 1_000_000_000, 2_000_000_000, 3_000_000_000],
            captured_at_ns: 0,
            channels: vec![
                CalibratedChannelBlock {
                    index: 0,
                    name: "A".into(),
                    unit: "mm".into(),
                    values: vec![0.0, 0.1, 0.2, 0.3],
                },
                CalibratedChannelBlock {
                    index: 1,
                    name: "B".into(),
                    unit: "mm".into(),
                    values: vec![1.0, 1.1, 1.2, 1.3],
                },
            ],
        };
        tx.send_block(block);
        tx.send_terminal();

        let frame = streamer.next_frame().await.unwrap();
        assert_eq!(frame.timestamps_ns, vec![0, 2_000_000_000]);
        assert_eq!(frame.channels.len(), 1);
        assert_eq!(frame.channels[0].index, 1);
        assert_eq!(frame.channels[0].values, vec![1.0, 1.2]);
        assert!(streamer.is_done());
        assert!(streamer.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected_at_construction() {
        let (_tx, rx) = preview_channel(4);
        let station_channels = vec![channel(0, "A")];
        let options = PreviewOptions {
            channels: vec![9],
            downsample: 1,
            max_duration_s: 10.0,
        };
        let err = PreviewStreamer::new(rx, &station_channels, options).unwrap_err();
        assert!(matches!(err, DaqError::UnknownChannel(9)));
    }

    #[test]
    fn overflow_drops_oldest_but_always_keeps_terminal() {
        let (tx, mut rx) = preview_channel(1);
        let block = CalibratedBlock {
            station_id: "s".into(),
            timestamps_ns: vec![0],
            captured_at_ns: 0,
            channels: vec![],
        };
        tx.send_block(block);
        tx.send_terminal();
        let first = rx.inner.state.lock().unwrap().pop_front();
        assert!(matches!(first, Some(PreviewEvent::Terminal)));
    }
}
