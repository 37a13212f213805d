use crate::config::types::{Options, DEFAULT_COMMAND_TIMEOUT_SECS};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Basename used when `-c` is not given.
pub const DEFAULT_NAME: &str = "opmon";

pub const CONFIG_EXT: &str = "conf";
pub const LOG_EXT: &str = "log";

/// Installation prefix fixed at build time.
pub const INSTALL_PREFIX: &str = match option_env!("OPMON_PREFIX") {
    Some(prefix) => prefix,
    None => "/usr/local",
};

/// Fixed directory conventions under an installation prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub prefix: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub binary: PathBuf,
}

impl Layout {
    /// Layout of the installed daemon.
    pub fn installed() -> Self {
        Self::rooted(INSTALL_PREFIX)
    }

    pub fn rooted(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            config_dir: prefix.join("etc"),
            log_dir: prefix.join("var").join("log"),
            binary: prefix.join("bin").join(DEFAULT_NAME),
            prefix,
        }
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.{}", name, CONFIG_EXT))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.{}", name, LOG_EXT))
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::installed()
    }
}

/// Everything the daemon knows about itself once bootstrap is over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonContext {
    name: String,
    config_path: PathBuf,
    log_path: PathBuf,
    debug_level: u32,
    pid: u32,
    pidfile: PathBuf,
    scanlog: Option<PathBuf>,
    command_timeout: Duration,
}

impl DaemonContext {
    /// Context as known before configuration is read.
    pub(crate) fn startup(layout: &Layout, name: &str, debug_level: u32) -> Self {
        Self {
            name: name.to_string(),
            config_path: layout.config_path(name),
            log_path: layout.log_path(name),
            debug_level,
            pid: std::process::id(),
            pidfile: PathBuf::new(),
            scanlog: None,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Record the post-fork process id.
    pub(crate) fn detached(mut self) -> Self {
        self.pid = std::process::id();
        self
    }

    pub(crate) fn configured(mut self, options: &Options) -> Self {
        self.pidfile = options.pidfile.clone();
        self.scanlog = options.scanlog.clone();
        self.command_timeout = Duration::from_secs(options.command_timeout);
        self
    }

    /// Build a finished context directly, for driving the loop without a
    /// bootstrap.
    pub fn new(layout: &Layout, name: &str, debug_level: u32, options: &Options) -> Self {
        Self::startup(layout, name, debug_level).configured(options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn debug_level(&self) -> u32 {
        self.debug_level
    }

    /// Debug mode: no fork, console logging, no restart.
    pub fn is_foreground(&self) -> bool {
        self.debug_level > 0
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    pub fn scanlog(&self) -> Option<&Path> {
        self.scanlog.as_deref()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
