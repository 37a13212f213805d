//! Configuration collaborator boundary.
//!
//! The supervisor only needs `load(path)` and the options it yields. Any
//! malformed or unreadable input is a fatal setup error for the caller.

use crate::config::types::{Options, Result, SupervisorError};
use std::fs;
use std::path::Path;

pub trait ConfigSource {
    fn load(&self, path: &Path) -> Result<Options>;
}

/// Reads [`Options`] from a JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfig;

impl ConfigSource for JsonConfig {
    fn load(&self, path: &Path) -> Result<Options> {
        let content = fs::read_to_string(path).map_err(|e| {
            SupervisorError::Config(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let options: Options = serde_json::from_str(&content).map_err(|e| {
            SupervisorError::Config(format!("Malformed configuration {}: {}", path.display(), e))
        })?;

        if options.pidfile.as_os_str().is_empty() {
            return Err(SupervisorError::Config(format!(
                "{}: pidfile must not be empty",
                path.display()
            )));
        }

        Ok(options)
    }
}
