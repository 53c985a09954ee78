//! Error types shared across the acquisition pipeline.

use thiserror::Error;

/// Top-level error type for the acquisition pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("board unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("board reported an overrun: {0}")]
    Overrun(String),

    #[error("channel configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("board read timed out: {0}")]
    Timeout(String),

    #[error("sink '{sink}' dropped a sample: queue full")]
    SinkEnqueueDropped { sink: String },

    #[error("sink '{sink}' failed to write: {message}")]
    SinkWriteFailed { sink: String, message: String },

    #[error("a session is already running")]
    SessionConflict,

    #[error("no active session")]
    NoActiveSession,

    #[error("channel index {0} is not configured")]
    UnknownChannel(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type DaqResult<T> = Result<T, DaqError>;
