//! Daemonization: detach from the terminal and session.
//!
//! Must run while the process is single-threaded. Every failure is fatal.
//!
//! Order: fork (parent exits 0) -> setpgid -> umask -> stdio onto /dev/null

use crate::config::types::{Result, SupervisorError};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{close, dup2, fork, setpgid, ForkResult, Pid};
use std::fs::OpenOptions;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;

/// Mask for files created after detaching: owner only.
pub const DAEMON_UMASK: u32 = 0o077;

pub const NULL_DEVICE: &str = "/dev/null";

const STDIO: [RawFd; 3] = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];

/// Detaches the process during bootstrap.
pub trait Daemonizer: Send {
    fn detach(&mut self) -> Result<()>;
}

/// Detaches the running process with [`daemonize`].
#[derive(Debug, Default)]
pub struct HostDaemonizer;

impl Daemonizer for HostDaemonizer {
    fn detach(&mut self) -> Result<()> {
        daemonize()
    }
}

/// Fork into the background. Only the child returns.
pub fn daemonize() -> Result<()> {
    // SAFETY: called during bootstrap before any thread is spawned.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            // SAFETY: the parent has nothing to flush or tear down.
            unsafe { libc::_exit(0) }
        }
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(SupervisorError::Process(format!("fork(): {}", e))),
    }

    setpgid(Pid::from_raw(0), Pid::from_raw(0))
        .map_err(|e| SupervisorError::Process(format!("setpgid(): {}", e)))?;

    apply_umask(DAEMON_UMASK)?;

    let null_fd = open_null_device(Path::new(NULL_DEVICE))?;
    redirect(null_fd, &STDIO)?;

    Ok(())
}

pub fn apply_umask(mask: u32) -> Result<Mode> {
    let mode = Mode::from_bits(mask as libc::mode_t)
        .ok_or_else(|| SupervisorError::Config(format!("Invalid umask: {:o}", mask)))?;
    Ok(umask(mode))
}

fn open_null_device(path: &Path) -> Result<RawFd> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SupervisorError::Filesystem(format!("open({}): {}", path.display(), e)))?;
    Ok(file.into_raw_fd())
}

/// Duplicate `source` onto every descriptor in `targets`, then close
/// `source` unless it is one of them.
pub fn redirect(source: RawFd, targets: &[RawFd]) -> Result<()> {
    for &target in targets {
        dup2(source, target).map_err(|e| {
            SupervisorError::Process(format!("dup2({}, {}): {}", source, target, e))
        })?;
    }

    if !targets.contains(&source) {
        close(source).map_err(|e| SupervisorError::Process(format!("close({}): {}", source, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::os::unix::io::{AsRawFd, FromRawFd};

    #[test]
    fn redirect_points_targets_at_source() {
        let dir = tempfile::tempdir().unwrap();
        let sink_path = dir.path().join("sink");
        let sink = File::create(&sink_path).unwrap().into_raw_fd();
        let target = File::create(dir.path().join("target")).unwrap().into_raw_fd();

        redirect(sink, &[target]).unwrap();

        // SAFETY: target is open and owned by this test.
        let mut target_file = unsafe { File::from_raw_fd(target) };
        target_file.write_all(b"redirected").unwrap();
        drop(target_file);

        assert_eq!(fs::read_to_string(&sink_path).unwrap(), "redirected");
    }

    #[test]
    fn redirect_keeps_source_when_it_is_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("self")).unwrap();
        let fd = file.as_raw_fd();

        redirect(fd, &[fd]).unwrap();
        assert!(nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).is_ok());
    }

    #[test]
    fn null_device_opens() {
        let fd = open_null_device(Path::new(NULL_DEVICE)).unwrap();
        close(fd).unwrap();
    }

    #[test]
    fn missing_null_device_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_null_device(&dir.path().join("null")).is_err());
    }

    #[test]
    fn umask_roundtrip() {
        let previous = apply_umask(DAEMON_UMASK).unwrap();
        let current = apply_umask(previous.bits() as u32).unwrap();
        assert_eq!(current.bits() as u32, DAEMON_UMASK);
    }
}
