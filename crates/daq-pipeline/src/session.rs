//! Session Manager: owns at most one concurrent acquisition, spawning the
//! Runner on its own worker thread and bridging it to a single preview
//! subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daq_board::BoardDriver;
use daq_sinks::{CsvSink, DatabaseSink, FtpSink, SampleSink};
use daq_types::{DaqError, DaqResult, StationConfig, StorageSettings};
use tokio::sync::Mutex;
use tracing::warn;

use crate::preview::{preview_channel, PreviewReceiver};
use crate::runner::{wall_now_ns, AcquisitionMode, AcquisitionRunner, RunOutcome, RunSummary};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Constructs a fresh [`BoardDriver`] for each session. A closure rather
/// than a shared instance: the mock driver's one-shot fault injection and
/// any real driver's handle are meant to be session-scoped.
pub type BoardFactory = Arc<dyn Fn() -> Box<dyn BoardDriver> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Finished,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub station_id: String,
    pub mode: Option<AcquisitionMode>,
    pub status: SessionStatus,
    pub started_at_ns: Option<i64>,
    pub finished_at_ns: Option<i64>,
    pub error: Option<String>,
    pub samples_per_channel: u64,
}

impl SessionSummary {
    fn idle(station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            mode: None,
            status: SessionStatus::Idle,
            started_at_ns: None,
            finished_at_ns: None,
            error: None,
            samples_per_channel: 0,
        }
    }
}

struct ActiveSession {
    stop_flag: Arc<AtomicBool>,
    result_rx: Option<Receiver<RunSummary>>,
    mode: AcquisitionMode,
    started_at_ns: i64,
    preview_rx: Option<PreviewReceiver>,
    preview_taken: bool,
}

struct ManagerState {
    active: Option<ActiveSession>,
    last_summary: Option<SessionSummary>,
}

/// Single owned object; no process-wide mutable state. Configuration and
/// the board factory are values handed in at construction.
pub struct SessionManager {
    station: StationConfig,
    storage: StorageSettings,
    board_factory: BoardFactory,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn new(station: StationConfig, storage: StorageSettings, board_factory: BoardFactory) -> Self {
        Self {
            station,
            storage,
            board_factory,
            state: Mutex::new(ManagerState {
                active: None,
                last_summary: None,
            }),
        }
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    pub async fn start(&self, mode: AcquisitionMode, preview: bool) -> DaqResult<SessionSummary> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(DaqError::SessionConflict);
        }

        let effective_mode = if preview { AcquisitionMode::Test } else { mode };
        let (preview_tx, preview_rx) = if preview {
            let (tx, rx) = preview_channel(4);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let sinks = build_sinks(&self.storage, &self.station.station_id)?;
        let board = (self.board_factory)();
        let runner = AcquisitionRunner::new(self.station.clone(), board, sinks, preview_tx);
        let stop_flag = runner.stop_handle();
        let started_at_ns = wall_now_ns();

        let (result_tx, result_rx) = std::sync::mpsc::channel();
        thread::Builder::new()
            .name("daq-acquisition-runner".into())
            .spawn(move || {
                let summary = runner.run(effective_mode);
                let _ = result_tx.send(summary);
            })
            .map_err(|e| DaqError::Other(anyhow::anyhow!(e)))?;

        state.active = Some(ActiveSession {
            stop_flag,
            result_rx: Some(result_rx),
            mode: effective_mode,
            started_at_ns,
            preview_rx,
            preview_taken: false,
        });

        Ok(SessionSummary {
            station_id: self.station.station_id.clone(),
            mode: Some(effective_mode),
            status: SessionStatus::Running,
            started_at_ns: Some(started_at_ns),
            finished_at_ns: None,
            error: None,
            samples_per_channel: 0,
        })
    }

    pub async fn stop(&self) -> DaqResult<SessionSummary> {
        let mut state = self.state.lock().await;
        let Some(mut active) = state.active.take() else {
            return Err(DaqError::NoActiveSession);
        };
        active.stop_flag.store(true, Ordering::SeqCst);

        let result_rx = active.result_rx.take().expect("result channel taken once");
        let join_result = tokio::task::spawn_blocking(move || result_rx.recv_timeout(STOP_JOIN_TIMEOUT))
            .await
            .map_err(|e| DaqError::Other(anyhow::anyhow!(e)))?;

        let summary = match join_result {
            Ok(run_summary) => {
                self.finalize(run_summary, active.started_at_ns, active.mode)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("acquisition runner did not stop within the 10s bound, orphaning worker thread");
                SessionSummary {
                    station_id: self.station.station_id.clone(),
                    mode: Some(active.mode),
                    status: SessionStatus::Stopped,
                    started_at_ns: Some(active.started_at_ns),
                    finished_at_ns: Some(wall_now_ns()),
                    error: Some("worker did not terminate within the stop timeout".into()),
                    samples_per_channel: 0,
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("acquisition runner thread ended without reporting a result");
                SessionSummary {
                    station_id: self.station.station_id.clone(),
                    mode: Some(active.mode),
                    status: SessionStatus::Failed,
                    started_at_ns: Some(active.started_at_ns),
                    finished_at_ns: Some(wall_now_ns()),
                    error: Some("runner thread panicked".into()),
                    samples_per_channel: 0,
                }
            }
        };

        state.last_summary = Some(summary.clone());
        Ok(summary)
    }

    pub async fn status(&self) -> SessionSummary {
        let mut state = self.state.lock().await;
        if let Some(active) = &mut state.active {
            if let Some(rx) = &active.result_rx {
                if let Ok(run_summary) = rx.try_recv() {
                    let summary = self.finalize(run_summary, active.started_at_ns, active.mode);
                    state.active = None;
                    state.last_summary = Some(summary.clone());
                    return summary;
                }
            }
            return SessionSummary {
                station_id: self.station.station_id.clone(),
                mode: Some(active.mode),
                status: SessionStatus::Running,
                started_at_ns: Some(active.started_at_ns),
                finished_at_ns: None,
                error: None,
                samples_per_channel: 0,
            };
        }
        state
            .last_summary
            .clone()
            .unwrap_or_else(|| SessionSummary::idle(&self.station.station_id))
    }

    /// Takes the preview receiver for the active session. Fails with
    /// `Conflict` if preview wasn't requested at start, or if a subscriber
    /// already took it.
    pub async fn subscribe_preview(&self) -> DaqResult<PreviewReceiver> {
        let mut state = self.state.lock().await;
        let Some(active) = &mut state.active else {
            return Err(DaqError::NoActiveSession);
        };
        if active.preview_taken {
            return Err(DaqError::SessionConflict);
        }
        let Some(rx) = active.preview_rx.take() else {
            return Err(DaqError::SessionConflict);
        };
        active.preview_taken = true;
        Ok(rx)
    }

    fn finalize(&self, run_summary: RunSummary, started_at_ns: i64, mode: AcquisitionMode) -> SessionSummary {
        let status = match run_summary.outcome {
            RunOutcome::Finished => SessionStatus::Finished,
            RunOutcome::Stopped => SessionStatus::Stopped,
            RunOutcome::Failed => SessionStatus::Failed,
        };
        SessionSummary {
            station_id: self.station.station_id.clone(),
            mode: Some(mode),
            status,
            started_at_ns: Some(started_at_ns),
            finished_at_ns: Some(wall_now_ns()),
            error: run_summary.error,
            samples_per_channel: run_summary.samples_per_channel,
        }
    }
}

/// Builds the active sink set from `storage.effective_sinks()`, in order.
fn build_sinks(storage: &StorageSettings, station_id: &str) -> DaqResult<Vec<Box<dyn SampleSink>>> {
    let mut sinks: Vec<Box<dyn SampleSink>> = Vec::new();
    for kind in storage.effective_sinks() {
        match kind.as_str() {
            "influxdb_v2" | "database" => {
                sinks.push(Box::new(DatabaseSink::new(storage)));
            }
            "csv" => {
                let csv_settings = storage.csv.clone().unwrap_or_default();
                sinks.push(Box::new(CsvSink::new(csv_settings, station_id)));
            }
            "ftp" => {
                let csv_settings = storage.csv.clone().unwrap_or_default();
                let ftp_settings = storage.ftp.clone().ok_or_else(|| DaqError::ConfigInvalid {
                    message: "ftp sink configured without an ftp section".into(),
                })?;
                let staging = CsvSink::new(csv_settings, station_id);
                sinks.push(Box::new(FtpSink::new(staging, ftp_settings)));
            }
            other => {
                return Err(DaqError::ConfigInvalid {
                    message: format!("unknown sink kind '{other}'"),
                });
            }
        }
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_board::MockBoardDriver;
    use daq_types::{AcquisitionSettings, Calibration, ChannelConfig};

    fn station() -> StationConfig {
        StationConfig {
            station_id: "station-01".into(),
            acquisition: AcquisitionSettings {
                sample_rate_hz: 10_000.0,
                block_size: 8,
                duration_s: None,
                total_samples: Some(16),
                drift_correction_threshold_ns: None,
            },
            channels: vec![ChannelConfig {
                index: 0,
                name: "ch0".into(),
                unit: "V".into(),
                voltage_range: 10.0,
                calibration: Calibration::default(),
            }],
        }
    }

    fn storage() -> StorageSettings {
        StorageSettings {
            driver: "csv".into(),
            url: String::new(),
            org: String::new(),
            bucket: String::new(),
            token: String::new(),
            batch_size: 100,
            timeout_s: 5.0,
            queue_max_size: 1000,
            verify_ssl: true,
            retry: Default::default(),
            sinks: vec!["csv".into()],
            csv: Some(daq_types::CsvSinkSettings {
                directory: std::env::temp_dir()
                    .join("daq-session-test")
                    .to_string_lossy()
                    .to_string(),
                ..Default::default()
            }),
            ftp: None,
        }
    }

    #[tokio::test]
    async fn rejects_second_concurrent_start() {
        let manager = SessionManager::new(
            station(),
            storage(),
            Arc::new(|| Box::new(MockBoardDriver::new()) as Box<dyn BoardDriver>),
        );
        manager.start(AcquisitionMode::Continuous, false).await.unwrap();
        let err = manager
            .start(AcquisitionMode::Continuous, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::SessionConflict));
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_with_no_active_session_conflicts() {
        let manager = SessionManager::new(
            station(),
            storage(),
            Arc::new(|| Box::new(MockBoardDriver::new()) as Box<dyn BoardDriver>),
        );
        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, DaqError::NoActiveSession));
    }

    #[tokio::test]
    async fn sample_budget_finishes_session_on_its_own() {
        let manager = SessionManager::new(
            station(),
            storage(),
            Arc::new(|| Box::new(MockBoardDriver::new()) as Box<dyn BoardDriver>),
        );
        manager.start(AcquisitionMode::Continuous, false).await.unwrap();
        let mut summary = manager.status().await;
        for _ in 0..50 {
            if summary.status != SessionStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            summary = manager.status().await;
        }
        assert_eq!(summary.status, SessionStatus::Finished);
        assert_eq!(summary.samples_per_channel, 16);
    }
}
