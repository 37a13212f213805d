//! Scan result log.
//!
//! Written by the scan engine, rotated together with the primary log.
//! Writes while closed are dropped.

use super::logging::{open_append, timestamp, LogSink};
use crate::config::types::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ScanLog {
    file: Mutex<Option<File>>,
}

impl ScanLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().map(|f| f.is_some()).unwrap_or(false)
    }

    pub fn write_line(&self, line: &str) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "[{}] {}", timestamp(), line) {
                log::warn!("SCANLOG -> write failed: {}", e);
            }
        }
    }
}

impl LogSink for ScanLog {
    fn name(&self) -> &str {
        "scanlog"
    }

    fn open(&self, path: &Path) -> Result<()> {
        let file = open_append(path)?;
        if let Ok(mut guard) = self.file.lock() {
            *guard = Some(file);
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.file.lock() {
            *guard = None;
        }
    }
}
