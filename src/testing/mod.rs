//! Testing infrastructure
//!
//! Recording stand-ins for the kernel-facing seams, so bootstrap ordering,
//! restart and rotation can be asserted without forking, exec'ing or
//! touching real privileges. Every fake appends to a shared [`EventLog`].

use crate::config::types::{Result, SupervisorError};
use crate::core::engine::Engine;
use crate::exec::ProcessImage;
use crate::kernel::daemon::Daemonizer;
use crate::kernel::lease::{AccessMode, PrivilegeBackend, PromiseSet};
use crate::observability::LogSink;
use std::ffi::{CStr, CString};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Ordered, shareable list of recorded events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.into()),
            Err(poisoned) => poisoned.into_inner().push(event.into()),
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Index of the first event starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

/// Privilege backend that records requests instead of enforcing them.
///
/// Events: `pledge <promises>` and `unveil <path> "<mode>"`.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    events: EventLog,
    fail_pledge: bool,
    fail_unveil: Option<PathBuf>,
}

impl RecordingBackend {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn fail_pledge(mut self) -> Self {
        self.fail_pledge = true;
        self
    }

    pub fn fail_unveil(mut self, path: impl Into<PathBuf>) -> Self {
        self.fail_unveil = Some(path.into());
        self
    }
}

impl PrivilegeBackend for RecordingBackend {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn pledge(&mut self, promises: PromiseSet) -> Result<()> {
        if self.fail_pledge {
            return Err(SupervisorError::Privilege(format!(
                "pledge(\"{}\"): refused",
                promises
            )));
        }
        self.events.push(format!("pledge {}", promises));
        Ok(())
    }

    fn unveil(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        if self.fail_unveil.as_deref() == Some(path) {
            return Err(SupervisorError::PathGrant(format!(
                "unveil({}, \"{}\"): refused",
                path.display(),
                mode.as_unveil_str()
            )));
        }
        self.events
            .push(format!("unveil {} {:?}", path.display(), mode.as_unveil_str()));
        Ok(())
    }
}

/// Daemonizer that records the request and stays in the foreground.
///
/// Events: `daemonize`.
#[derive(Debug, Default)]
pub struct RecordingDaemonizer {
    events: EventLog,
    fail: bool,
}

impl RecordingDaemonizer {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Daemonizer for RecordingDaemonizer {
    fn detach(&mut self) -> Result<()> {
        if self.fail {
            return Err(SupervisorError::Process("fork(): simulated failure".to_string()));
        }
        self.events.push("daemonize");
        Ok(())
    }
}

/// Process image that records descriptor hygiene and never execs.
///
/// Events: `cloexec <fd>` and `exec <target> <argv...>`.
#[derive(Debug)]
pub struct FakeImage {
    events: EventLog,
    limit: Option<u64>,
}

impl FakeImage {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            limit: Some(8),
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn failing_limit(mut self) -> Self {
        self.limit = None;
        self
    }
}

impl ProcessImage for FakeImage {
    fn descriptor_limit(&self) -> Result<u64> {
        self.limit.ok_or_else(|| {
            SupervisorError::ResourceLimit(
                "getrlimit() error retrieving RLIMIT_NOFILE (simulated)".to_string(),
            )
        })
    }

    fn set_cloexec(&self, fd: RawFd) {
        self.events.push(format!("cloexec {}", fd));
    }

    fn replace(&self, target: &CStr, argv: &[CString]) -> SupervisorError {
        let args: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.events.push(format!(
            "exec {} {}",
            target.to_string_lossy(),
            args.join(" ")
        ));
        SupervisorError::Process("execv: simulated failure".to_string())
    }
}

/// Log sink that records open/close calls.
///
/// Events: `open <name> <path>` and `close <name>`.
#[derive(Debug)]
pub struct RecordingSink {
    name: String,
    events: EventLog,
}

impl RecordingSink {
    pub fn new(name: impl Into<String>, events: EventLog) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }
}

impl LogSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: &Path) -> Result<()> {
        self.events
            .push(format!("open {} {}", self.name, path.display()));
        Ok(())
    }

    fn close(&self) {
        self.events.push(format!("close {}", self.name));
    }
}

/// Engine that records each call.
///
/// Events: `<name> cycle` and `<name> timer`.
#[derive(Debug)]
pub struct RecordingEngine {
    name: String,
    events: EventLog,
}

impl RecordingEngine {
    pub fn new(name: impl Into<String>, events: EventLog) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(&mut self) {
        self.events.push(format!("{} cycle", self.name));
    }

    fn timer(&mut self) {
        self.events.push(format!("{} timer", self.name));
    }
}
