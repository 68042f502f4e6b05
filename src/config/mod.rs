// src/config/mod.rs

//! TOML DAG-definition loading for the `dagrun` binary.
//!
//! The library API takes [`crate::dag::Step`] values directly; this module
//! is the binary's glue from a definition file to those values.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, StepConfig};
