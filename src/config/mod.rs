//! # Typhoon Configuration Module
//!
//! This module centralizes the configuration constants of the engine. Values
//! are grouped by functional area and interdependencies are enforced through
//! compile-time assertions.
//!
//! ## Module Organization
//!
//! - [`constants`]: numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
