//! PID marker file: one decimal process id, newline terminated.
//!
//! Opening and writing are split so the file can be created while the
//! broad lease still allows it and written after the lease has narrowed.

use crate::config::types::{Result, SupervisorError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Create or truncate `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            SupervisorError::Filesystem(format!(
                "Error opening pid file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `pid` and close the file.
    pub fn write(mut self, pid: u32) -> Result<()> {
        writeln!(self.file, "{}", pid)
            .and_then(|_| self.file.flush())
            .map_err(|e| {
                SupervisorError::Filesystem(format!(
                    "Error writing pid file {}: {}",
                    self.path.display(),
                    e
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn writes_decimal_pid_with_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opmon.pid");

        PidFile::create(&path).unwrap().write(4242).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242\n");
    }

    #[test]
    fn truncates_stale_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opmon.pid");
        fs::write(&path, "999999999\n").unwrap();

        PidFile::create(&path).unwrap().write(7).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "7\n");
    }

    #[test]
    fn missing_directory_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PidFile::create(&dir.path().join("run/opmon.pid")).unwrap_err();
        assert!(matches!(err, SupervisorError::Filesystem(_)));
    }
}
