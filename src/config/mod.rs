// src/config/mod.rs

//! Configuration loading and validation for starter.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate pool settings and the simulated task graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, PoolSection, SchedulerSection, TaskConfig};
pub use validate::validate_config;
