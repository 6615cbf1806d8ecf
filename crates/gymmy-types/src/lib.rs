//! Shared domain types for the GymmyGo pose pipeline.

pub mod config;
pub mod events;
pub mod frame;
pub mod pose;
pub mod telemetry;

mod errors;

pub use errors::{GymmyError, Result};
