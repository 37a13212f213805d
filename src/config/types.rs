/// Core types shared across the opmon supervisor
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Seconds an operator command may wait for its reply before being swept.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 180;

/// Runtime options supplied by the configuration collaborator.
///
/// Only the fields the supervisor itself needs are modelled here; the
/// protocol and scan engines read their own sections.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Options {
    /// Where the process id is written once at startup
    pub pidfile: PathBuf,
    /// Optional scan result log, reopened on rotation
    #[serde(default)]
    pub scanlog: Option<PathBuf>,
    /// Operator command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Options {
    pub fn new(pidfile: impl Into<PathBuf>) -> Self {
        Self {
            pidfile: pidfile.into(),
            scanlog: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_scanlog(mut self, scanlog: impl Into<PathBuf>) -> Self {
        self.scanlog = Some(scanlog.into());
        self
    }
}

/// Custom error types for opmon
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Path grant error: {0}")]
    PathGrant(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource limit error: {0}")]
    ResourceLimit(String),
}

impl From<nix::errno::Errno> for SupervisorError {
    fn from(err: nix::errno::Errno) -> Self {
        SupervisorError::Process(err.to_string())
    }
}

/// Result type alias for opmon operations
pub type Result<T> = std::result::Result<T, SupervisorError>;
