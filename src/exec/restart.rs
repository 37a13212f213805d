//! In-place restart by process image replacement.
//!
//! The original argument vector is captured once at startup. A restart
//! flags every descriptor below the soft RLIMIT_NOFILE close-on-exec and
//! then execs the installed binary with that vector, unmodified.

use crate::config::types::{Result, SupervisorError};
use crate::kernel::lease::{AccessMode, RuntimeLease};
use crate::utils::fd_closure;
use nix::sys::resource::{getrlimit, Resource};
use std::ffi::{CStr, CString, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Immutable snapshot of how this process was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    argv: Vec<CString>,
}

impl Invocation {
    pub fn capture() -> Result<Self> {
        Self::from_args(std::env::args_os())
    }

    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv = args
            .into_iter()
            .map(|arg| {
                CString::new(arg.into().into_vec()).map_err(|_| {
                    SupervisorError::Config("argument contains NUL byte".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// The captured arguments, for command-line parsing.
    pub fn args_os(&self) -> Vec<OsString> {
        self.argv
            .iter()
            .map(|arg| OsString::from_vec(arg.as_bytes().to_vec()))
            .collect()
    }
}

/// Kernel operations a restart needs. Replaced by a recorder in tests.
pub trait ProcessImage: Send {
    /// Soft RLIMIT_NOFILE
    fn descriptor_limit(&self) -> Result<u64>;
    fn set_cloexec(&self, fd: RawFd);
    /// Replace the process image. Only returns on failure.
    fn replace(&self, target: &CStr, argv: &[CString]) -> SupervisorError;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostImage;

impl ProcessImage for HostImage {
    fn descriptor_limit(&self) -> Result<u64> {
        let (soft, _hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(|e| {
            SupervisorError::ResourceLimit(format!(
                "getrlimit() error retrieving RLIMIT_NOFILE ({})",
                e
            ))
        })?;
        Ok(soft as u64)
    }

    fn set_cloexec(&self, fd: RawFd) {
        fd_closure::set_cloexec(fd);
    }

    fn replace(&self, target: &CStr, argv: &[CString]) -> SupervisorError {
        match nix::unistd::execv(target, argv) {
            Ok(never) => match never {},
            Err(e) => SupervisorError::Process(e.to_string()),
        }
    }
}

/// Why a restart returned instead of replacing the image.
#[derive(Debug)]
pub enum RestartFailure {
    /// The descriptor limit could not be read; nothing was attempted
    LimitQuery(SupervisorError),
    /// exec failed after descriptor hygiene
    Exec(SupervisorError),
}

pub struct RestartCoordinator {
    target: PathBuf,
    invocation: Invocation,
    image: Box<dyn ProcessImage>,
}

impl RestartCoordinator {
    pub fn new(target: PathBuf, invocation: Invocation, image: Box<dyn ProcessImage>) -> Self {
        Self {
            target,
            invocation,
            image,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replace the running image. Returns only if that was impossible.
    pub fn restart(&self, lease: &RuntimeLease) -> RestartFailure {
        let limit = match self.image.descriptor_limit() {
            Ok(limit) => limit,
            Err(e) => return RestartFailure::LimitQuery(e),
        };

        fd_closure::for_each_below(limit, |fd| self.image.set_cloexec(fd));

        if let Err(e) = lease.require(&self.target, AccessMode::Execute) {
            return RestartFailure::Exec(e);
        }

        let target = match CString::new(self.target.as_os_str().as_bytes()) {
            Ok(target) => target,
            Err(_) => {
                return RestartFailure::Exec(SupervisorError::Config(format!(
                    "restart target {} contains NUL byte",
                    self.target.display()
                )))
            }
        };

        RestartFailure::Exec(self.image.replace(&target, self.invocation.argv()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lease::{Sequencer, Startup};
    use crate::testing::{EventLog, FakeImage, RecordingBackend};

    fn runtime_lease(target: &Path) -> RuntimeLease {
        let mut seq = Sequencer::<Startup>::new(Box::new(RecordingBackend::default()))
            .request_startup_lease()
            .unwrap()
            .configuration_loaded();
        seq.grant(target, AccessMode::Execute).unwrap();
        seq.narrow().unwrap()
    }

    #[test]
    fn invocation_roundtrips_arguments() {
        let inv = Invocation::from_args(["opmon", "-c", "test", "-d"]).unwrap();
        assert_eq!(inv.argv().len(), 4);
        assert_eq!(inv.argv()[2].to_str().unwrap(), "test");
        assert_eq!(
            inv.args_os(),
            vec![
                OsString::from("opmon"),
                OsString::from("-c"),
                OsString::from("test"),
                OsString::from("-d")
            ]
        );
    }

    #[test]
    fn invocation_rejects_nul() {
        assert!(Invocation::from_args(["op\0mon"]).is_err());
    }

    #[test]
    fn restart_marks_descriptors_then_execs_with_original_argv() {
        let events = EventLog::default();
        let target = PathBuf::from("/usr/local/bin/opmon");
        let argv = Invocation::from_args(["opmon", "-c", "irc"]).unwrap();
        let coordinator = RestartCoordinator::new(
            target.clone(),
            argv.clone(),
            Box::new(FakeImage::new(events.clone()).with_limit(4)),
        );

        let failure = coordinator.restart(&runtime_lease(&target));
        assert!(matches!(failure, RestartFailure::Exec(_)));

        assert_eq!(
            events.snapshot(),
            vec![
                "cloexec 0",
                "cloexec 1",
                "cloexec 2",
                "cloexec 3",
                "exec /usr/local/bin/opmon opmon -c irc",
            ]
        );
    }

    #[test]
    fn limit_failure_abandons_restart() {
        let events = EventLog::default();
        let target = PathBuf::from("/usr/local/bin/opmon");
        let coordinator = RestartCoordinator::new(
            target.clone(),
            Invocation::from_args(["opmon"]).unwrap(),
            Box::new(FakeImage::new(events.clone()).failing_limit()),
        );

        let failure = coordinator.restart(&runtime_lease(&target));
        assert!(matches!(failure, RestartFailure::LimitQuery(_)));
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn ungranted_target_is_never_executed() {
        let events = EventLog::default();
        let coordinator = RestartCoordinator::new(
            PathBuf::from("/opt/other/opmon"),
            Invocation::from_args(["opmon"]).unwrap(),
            Box::new(FakeImage::new(events.clone()).with_limit(1)),
        );

        let failure = coordinator.restart(&runtime_lease(Path::new("/usr/local/bin/opmon")));
        assert!(matches!(failure, RestartFailure::Exec(SupervisorError::PathGrant(_))));
        assert!(!events.snapshot().iter().any(|e| e.starts_with("exec")));
    }

    #[test]
    fn host_limit_is_readable() {
        assert!(HostImage.descriptor_limit().unwrap() > 2);
    }
}
