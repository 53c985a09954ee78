//! Control-plane HTTP surface for the acquisition daemon.

pub mod api;
pub mod auth;

pub use api::{create_router, AppState};
