#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod errors;
pub mod importer;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
