//! Privilege leases and path grants.
//!
//! A lease is the set of operation categories ("promises") the process may
//! still use. Leases only ever narrow. Path grants name every file the
//! process will touch and must all be declared before the lease drops the
//! ability to declare more.
//!
//! Dependency direction: journal -> backend -> sequencer

mod backend;
mod sequencer;

pub use backend::{HostBackend, PrivilegeBackend};
pub use sequencer::{Broad, Configured, Granting, Runtime, RuntimeLease, Sequencer, Startup};

use crate::config::types::{Result, SupervisorError};
use std::fmt;
use std::path::{Path, PathBuf};

/// One category of operations a lease can permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Promise {
    /// Basic I/O on already open descriptors
    Stdio,
    /// Read files
    Rpath,
    /// Write files
    Wpath,
    /// Create files
    Cpath,
    /// Network sockets
    Inet,
    /// Name resolution
    Dns,
    /// fork and process control
    Proc,
    /// execve
    Exec,
    /// Declare path grants
    Unveil,
}

impl Promise {
    pub const ALL: [Promise; 9] = [
        Promise::Stdio,
        Promise::Rpath,
        Promise::Wpath,
        Promise::Cpath,
        Promise::Inet,
        Promise::Dns,
        Promise::Proc,
        Promise::Exec,
        Promise::Unveil,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Promise::Stdio => "stdio",
            Promise::Rpath => "rpath",
            Promise::Wpath => "wpath",
            Promise::Cpath => "cpath",
            Promise::Inet => "inet",
            Promise::Dns => "dns",
            Promise::Proc => "proc",
            Promise::Exec => "exec",
            Promise::Unveil => "unveil",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A set of [`Promise`]s, rendered in pledge(2) string form by `Display`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PromiseSet(u16);

impl PromiseSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(promises: &[Promise]) -> Self {
        promises.iter().fold(Self::empty(), |set, p| set.with(*p))
    }

    /// Everything the process will ever need: file access for configuration
    /// and logs, network, resolver, exec for restart, and path declaration.
    pub fn startup() -> Self {
        Self::of(&[
            Promise::Stdio,
            Promise::Rpath,
            Promise::Wpath,
            Promise::Cpath,
            Promise::Inet,
            Promise::Dns,
            Promise::Proc,
            Promise::Exec,
            Promise::Unveil,
        ])
    }

    /// Steady-state lease: filesystem and path declaration are gone for good.
    pub fn runtime() -> Self {
        Self::of(&[Promise::Stdio, Promise::Inet, Promise::Dns, Promise::Exec])
    }

    pub fn with(self, promise: Promise) -> Self {
        Self(self.0 | promise.bit())
    }

    pub fn contains(self, promise: Promise) -> bool {
        self.0 & promise.bit() != 0
    }

    pub fn is_subset_of(self, other: PromiseSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Promise> {
        Promise::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PromiseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Promise::as_str).collect();
        write!(f, "{}", names.join(" "))
    }
}

impl fmt::Debug for PromiseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseSet({:?})", self.to_string())
    }
}

/// Access requested for a granted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Visible for path resolution only
    Discover,
    Read,
    WriteCreate,
    Execute,
}

impl AccessMode {
    /// Permission string in unveil(2) form
    pub fn as_unveil_str(self) -> &'static str {
        match self {
            AccessMode::Discover => "",
            AccessMode::Read => "r",
            AccessMode::WriteCreate => "wc",
            AccessMode::Execute => "x",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGrant {
    pub path: PathBuf,
    pub mode: AccessMode,
}

impl PathGrant {
    /// Whether this grant lets `path` be used with `mode`. A directory
    /// grant covers everything beneath it.
    pub fn covers(&self, path: &Path, mode: AccessMode) -> bool {
        self.mode == mode && self.mode != AccessMode::Discover && path.starts_with(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Lease(PromiseSet),
    Grant(PathGrant),
}

/// Append-only record of every lease and path grant, in issue order.
#[derive(Debug, Default, Clone)]
pub struct CapabilityJournal {
    entries: Vec<JournalEntry>,
    current: Option<PromiseSet>,
}

impl CapabilityJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `promises` would not widen the current lease.
    pub fn check_lease(&self, promises: PromiseSet) -> Result<()> {
        match self.current {
            Some(current) if !promises.is_subset_of(current) => Err(SupervisorError::Privilege(
                format!("lease \"{}\" would widen \"{}\"", promises, current),
            )),
            _ => Ok(()),
        }
    }

    pub fn record_lease(&mut self, promises: PromiseSet) -> Result<()> {
        self.check_lease(promises)?;
        self.entries.push(JournalEntry::Lease(promises));
        self.current = Some(promises);
        Ok(())
    }

    /// Check a grant before it reaches the OS. Returns `false` when the same
    /// grant was already declared and nothing needs to be issued.
    pub fn check_grant(&self, path: &Path, mode: AccessMode) -> Result<bool> {
        let lease = self.current.ok_or_else(|| {
            SupervisorError::PathGrant(format!(
                "grant for {} issued before any lease",
                path.display()
            ))
        })?;

        if !lease.contains(Promise::Unveil) {
            return Err(SupervisorError::PathGrant(format!(
                "lease \"{}\" no longer allows declaring {}",
                lease,
                path.display()
            )));
        }

        match self.grants().find(|g| g.path == path) {
            Some(existing) if existing.mode == mode => Ok(false),
            Some(existing) => Err(SupervisorError::PathGrant(format!(
                "{} already granted as \"{}\", refusing \"{}\"",
                path.display(),
                existing.mode.as_unveil_str(),
                mode.as_unveil_str()
            ))),
            None => Ok(true),
        }
    }

    pub fn record_grant(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        if self.check_grant(path, mode)? {
            self.entries.push(JournalEntry::Grant(PathGrant {
                path: path.to_path_buf(),
                mode,
            }));
        }
        Ok(())
    }

    /// Fail unless a grant declared so far covers `path` for `mode`.
    pub fn require(&self, path: &Path, mode: AccessMode) -> Result<()> {
        if self.grants().any(|g| g.covers(path, mode)) {
            Ok(())
        } else {
            Err(SupervisorError::PathGrant(format!(
                "no \"{}\" grant declared for {}",
                mode.as_unveil_str(),
                path.display()
            )))
        }
    }

    pub fn current_lease(&self) -> Option<PromiseSet> {
        self.current
    }

    pub fn leases(&self) -> impl Iterator<Item = PromiseSet> + '_ {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Lease(set) => Some(*set),
            JournalEntry::Grant(_) => None,
        })
    }

    pub fn grants(&self) -> impl Iterator<Item = &PathGrant> + '_ {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Grant(grant) => Some(grant),
            JournalEntry::Lease(_) => None,
        })
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }
}
