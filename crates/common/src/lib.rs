//! Common utilities for rfstream
//!
//! This crate provides shared plumbing for the driver and the CLI: error
//! handling, logging setup, TOML configuration for stream defaults and
//! device filters, and test helpers for generating and checking sample
//! patterns.

pub mod config;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use config::{DriverConfig, StreamSettings, UsbSettings};
pub use error::{Error, Result};
pub use logging::setup_logging;
