//! Acquisition Runner, Session Manager and Preview Streamer: the pieces
//! that turn a Board Driver and a set of Sample Sinks into a supervised,
//! previewable acquisition session.

pub mod preview;
pub mod runner;
pub mod session;

pub use preview::{preview_channel, PreviewChannelFrame, PreviewEvent, PreviewFrame, PreviewOptions, PreviewReceiver, PreviewSender, PreviewStreamer};
pub use runner::{AcquisitionMode, AcquisitionRunner, RunOutcome, RunSummary, TimestampState};
pub use session::{BoardFactory, SessionManager, SessionStatus, SessionSummary};
