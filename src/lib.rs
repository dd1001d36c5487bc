#![forbid(unsafe_code)]

//! Sequential installer queue that survives host restarts.

pub mod audit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
