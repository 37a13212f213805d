//! Configuration
//!
//! Shared error type, supervisor options, and the configuration loader boundary.

pub mod loader;
pub mod types;
