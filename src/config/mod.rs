//! Application Configuration Module
//!
//! Analysis cadence, window length, variable catalogue, polling periods,
//! producer connection parameters and export location, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `SLOPEWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `slopewatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`AppConfig`] is passed explicitly to the components that need
//! it; there is no process-global configuration.

mod app_config;
pub mod defaults;

pub use app_config::*;
