//! Primary log sink.
//!
//! Records go to stderr through env_logger until a log file is opened, and
//! are appended to that file afterwards. The file can be closed and reopened
//! at runtime for external rotation.
//!
//! The raw descriptor of the open file is mirrored in an atomic so the
//! interrupt handler can emit its last line with write(2) alone.

use crate::config::types::{Result, SupervisorError};
use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

const TIMESTAMP_FORMAT: &str = "%b %d %H:%M:%S %Y";

/// Descriptor of the primary log file, -1 when closed.
static LOG_FD: AtomicI32 = AtomicI32::new(-1);

static LOGGER: OnceCell<DaemonLogger> = OnceCell::new();

/// A file-backed log that can be closed and reopened by path.
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, path: &Path) -> Result<()>;
    fn close(&self);
}

/// Verbosity for a `-d` count.
pub fn level_for(debug_level: u32) -> LevelFilter {
    match debug_level {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub(crate) fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            SupervisorError::Filesystem(format!("Failed to open log {}: {}", path.display(), e))
        })
}

pub(crate) fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub struct DaemonLogger {
    level: LevelFilter,
    console: env_logger::Logger,
    file: Mutex<Option<File>>,
    publish_fd: bool,
}

impl DaemonLogger {
    fn build(level: LevelFilter, publish_fd: bool) -> Self {
        let console = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .build();

        Self {
            level,
            console,
            file: Mutex::new(None),
            publish_fd,
        }
    }

    /// Standalone logger, not installed globally and not visible to the
    /// interrupt handler.
    pub fn new(level: LevelFilter) -> Self {
        Self::build(level, false)
    }

    pub fn is_file_open(&self) -> bool {
        self.file.lock().map(|f| f.is_some()).unwrap_or(false)
    }

    fn replace_file(&self, file: Option<File>) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.publish_fd {
            let fd = file.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1);
            // Unpublish before the old file is dropped below.
            LOG_FD.store(fd, Ordering::SeqCst);
        }

        *guard = file;
    }
}

impl LogSink for DaemonLogger {
    fn name(&self) -> &str {
        "log"
    }

    fn open(&self, path: &Path) -> Result<()> {
        let file = open_append(path)?;
        self.replace_file(Some(file));
        Ok(())
    }

    fn close(&self) {
        self.replace_file(None);
    }
}

impl Log for DaemonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match guard.as_mut() {
            Some(file) => {
                let _ = writeln!(file, "[{}] {}", timestamp(), record.args());
            }
            None => {
                drop(guard);
                self.console.log(record);
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
        self.console.flush();
    }
}

/// Install the process-wide logger. Later calls keep the first logger and
/// only adjust the maximum level.
pub fn init(debug_level: u32) -> &'static DaemonLogger {
    let level = level_for(debug_level);
    let logger = LOGGER.get_or_init(|| DaemonLogger::build(level, true));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
    logger
}

/// The installed logger, installing an Info-level one if needed.
pub fn logger() -> &'static DaemonLogger {
    match LOGGER.get() {
        Some(logger) => logger,
        None => init(0),
    }
}

/// Handle on the process-wide logger for the lifecycle loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryLog;

impl PrimaryLog {
    pub fn shared() -> Arc<dyn LogSink> {
        Arc::new(PrimaryLog)
    }
}

impl LogSink for PrimaryLog {
    fn name(&self) -> &str {
        "log"
    }

    fn open(&self, path: &Path) -> Result<()> {
        logger().open(path)
    }

    fn close(&self) {
        logger().close()
    }
}

/// Write `line` to the open log file, or stderr when none is open.
///
/// Async-signal-safe: one atomic load and write(2), nothing else. The line
/// goes out as given, without the `[timestamp]` prefix that [`DaemonLogger`]
/// adds, because formatting local time is not safe in a signal handler.
pub fn write_raw(line: &[u8]) {
    let fd = LOG_FD.load(Ordering::SeqCst);
    let target = if fd >= 0 { fd } else { libc::STDERR_FILENO };
    // SAFETY: write(2) on a descriptor we own with a valid buffer.
    unsafe {
        libc::write(target, line.as_ptr() as *const libc::c_void, line.len());
    }
}
