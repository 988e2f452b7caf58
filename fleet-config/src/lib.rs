//! Configuration management for the fleet services.
//!
//! Provides environment detection, layered configuration loading from YAML files and
//! environment variables, secret handling, and the configuration types shared between the
//! API binary and its tests.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
