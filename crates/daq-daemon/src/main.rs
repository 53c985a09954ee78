//! Acquisition daemon binary: loads station/storage configuration, wires up
//! the Session Manager with a board driver, and serves the control-plane
//! HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use daq_board::{BoardDriver, MockBoardDriver};
use daq_daemon::{create_router, AppState};
use daq_pipeline::SessionManager;
use daq_types::{StationConfig, StorageSettings};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing `sensors.yaml` and `storage.yaml`.
    #[arg(long, default_value = "./config")]
    config_dir: String,

    /// Use the deterministic mock board driver. Currently the only driver
    /// this binary knows how to build -- real hardware is the vendor
    /// driver's job, not reimplemented here.
    #[arg(long, default_value_t = true)]
    mock: bool,

    /// Address to bind the control-plane HTTP server to.
    #[arg(long, default_value = "0.0.0.0:9000")]
    bind: String,

    /// Static bearer token gating every route but `/healthz`. Unset means
    /// no auth, matching a development deployment.
    #[arg(long)]
    token: Option<String>,
}

fn load_station(config_dir: &str) -> anyhow::Result<StationConfig> {
    let path = format!("{config_dir}/sensors.yaml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(StationConfig::from_yaml(&contents)?),
        Err(_) => {
            tracing::warn!(path = %path, "no station config found, using defaults");
            Ok(default_station())
        }
    }
}

fn load_storage(config_dir: &str) -> anyhow::Result<StorageSettings> {
    let path = format!("{config_dir}/storage.yaml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(StorageSettings::from_yaml(&contents)?),
        Err(_) => {
            tracing::warn!(path = %path, "no storage config found, using csv-only defaults");
            Ok(default_storage())
        }
    }
}

fn default_station() -> StationConfig {
    use daq_types::{AcquisitionSettings, Calibration, ChannelConfig};
    StationConfig {
        station_id: "station-01".into(),
        acquisition: AcquisitionSettings {
            sample_rate_hz: 1000.0,
            block_size: 100,
            duration_s: None,
            total_samples: None,
            drift_correction_threshold_ns: Some(5_000_000),
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

fn default_storage() -> StorageSettings {
    StorageSettings {
        driver: "influxdb_v2".into(),
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
        csv: Some(daq_types::CsvSinkSettings::default()),
        ftp: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daq_daemon=info,daq_pipeline=info,daq_sinks=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(?args, "acquisition daemon starting");

    let station = load_station(&args.config_dir)?;
    let storage = load_storage(&args.config_dir)?;
    storage.validate()?;

    if !args.mock {
        tracing::warn!("no non-mock board driver is implemented; falling back to the mock driver");
    }
    let board_factory: daq_pipeline::BoardFactory =
        Arc::new(|| Box::new(MockBoardDriver::new()) as Box<dyn BoardDriver>);

    let session = Arc::new(SessionManager::new(station, storage, board_factory));
    let state = AppState {
        session,
        auth_token: args.token,
    };

    let app = create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.bind.parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
