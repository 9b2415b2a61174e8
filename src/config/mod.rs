//! Trilateration Configuration Module
//!
//! Anchor layout, queue sizes and collaborator endpoints, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `TRILATERATOR_CONFIG` environment variable
//! 3. `trilateration_config.toml` in the current working directory
//!
//! A missing or invalid configuration is a fatal startup error. The loaded
//! value is passed explicitly to the components that need it.

mod settings;
pub mod defaults;
pub mod validation;

pub use settings::*;
