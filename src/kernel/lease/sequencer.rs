//! Type-state privilege sequence
//!
//! Startup -> Broad -> Configured -> Runtime
//!
//! Path grants are only possible in `Broad` and `Configured`. Narrowing is
//! only possible once configuration has been loaded, and `Runtime` can
//! neither grant nor widen. Illegal orderings do not compile:
//!
//! ```compile_fail
//! use opmon::kernel::lease::{Sequencer, Startup};
//! use opmon::testing::RecordingBackend;
//!
//! let seq = Sequencer::<Startup>::new(Box::new(RecordingBackend::default()))
//!     .request_startup_lease()
//!     .unwrap();
//! // Narrowing before configuration is loaded:
//! let _ = seq.narrow();
//! ```
//!
//! ```compile_fail
//! use opmon::kernel::lease::{AccessMode, Sequencer, Startup};
//! use opmon::testing::RecordingBackend;
//! use std::path::Path;
//!
//! let seq = Sequencer::<Startup>::new(Box::new(RecordingBackend::default()))
//!     .request_startup_lease()
//!     .unwrap()
//!     .configuration_loaded();
//! let mut runtime = seq.narrow().unwrap();
//! // Granting after the lease has narrowed:
//! runtime.grant(Path::new("/tmp/late.log"), AccessMode::WriteCreate);
//! ```

use super::{AccessMode, CapabilityJournal, PrivilegeBackend, PromiseSet};
use crate::config::types::Result;
use std::marker::PhantomData;
use std::path::Path;

/// Type-state marker: nothing requested yet
pub struct Startup;

/// Type-state marker: broad startup lease held, configuration not read
pub struct Broad;

/// Type-state marker: configuration loaded, late grants still possible
pub struct Configured;

/// Type-state marker: narrowed runtime lease
pub struct Runtime;

/// Marker for states that may still declare path grants.
pub trait Granting {}
impl Granting for Broad {}
impl Granting for Configured {}

pub struct Sequencer<S> {
    backend: Box<dyn PrivilegeBackend>,
    journal: CapabilityJournal,
    _state: PhantomData<S>,
}

/// Proof that the runtime lease has been issued.
pub type RuntimeLease = Sequencer<Runtime>;

impl<S> Sequencer<S> {
    fn advance<T>(self) -> Sequencer<T> {
        Sequencer {
            backend: self.backend,
            journal: self.journal,
            _state: PhantomData,
        }
    }

    fn issue_lease(&mut self, promises: PromiseSet) -> Result<()> {
        self.journal.check_lease(promises)?;
        self.backend.pledge(promises)?;
        self.journal.record_lease(promises)?;
        log::debug!(
            "Lease \"{}\" issued via {}",
            promises,
            self.backend.backend_name()
        );
        Ok(())
    }

    pub fn journal(&self) -> &CapabilityJournal {
        &self.journal
    }

    /// Fail unless `path` was granted for `mode` before this call.
    pub fn require(&self, path: &Path, mode: AccessMode) -> Result<()> {
        self.journal.require(path, mode)
    }
}

impl Sequencer<Startup> {
    pub fn new(backend: Box<dyn PrivilegeBackend>) -> Self {
        Self {
            backend,
            journal: CapabilityJournal::new(),
            _state: PhantomData,
        }
    }

    /// Request the broadest lease the process will ever need, then make the
    /// filesystem root discoverable so later grants resolve real paths.
    pub fn request_startup_lease(mut self) -> Result<Sequencer<Broad>> {
        self.issue_lease(PromiseSet::startup())?;
        let mut broad: Sequencer<Broad> = self.advance();
        broad.grant(Path::new("/"), AccessMode::Discover)?;
        Ok(broad)
    }
}

impl<S: Granting> Sequencer<S> {
    pub fn grant(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        if !self.journal.check_grant(path, mode)? {
            return Ok(());
        }
        self.backend.unveil(path, mode)?;
        self.journal.record_grant(path, mode)
    }
}

impl Sequencer<Broad> {
    /// Checkpoint: configuration has been read and every remaining path is
    /// now known.
    pub fn configuration_loaded(self) -> Sequencer<Configured> {
        self.advance()
    }
}

impl Sequencer<Configured> {
    /// Issue the runtime lease. Filesystem and path-declaration promises are
    /// gone after this.
    pub fn narrow(mut self) -> Result<RuntimeLease> {
        self.issue_lease(PromiseSet::runtime())?;
        Ok(self.advance())
    }
}
