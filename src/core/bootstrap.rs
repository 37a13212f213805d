//! Startup sequence, run once before the lifecycle loop.
//!
//! The order is fixed and every step is fatal on failure:
//!
//! 1. broad lease, root discoverable, core limit raised
//! 2. grant install prefix (read), chdir into it
//! 3. daemonize unless in debug mode; grant and open the log
//! 4. grant the configuration file (read) and load it
//! 5. grant and open the scan log, if configured
//! 6. grant and open the pid file
//! 7. grant the restart target (execute)
//! 8. narrow to the runtime lease
//! 9. write the pid
//!
//! Every path the process will ever touch is granted before step 8.

use crate::config::loader::{ConfigSource, JsonConfig};
use crate::config::types::{Result, SupervisorError};
use crate::core::supervisor::Supervisor;
use crate::core::types::{DaemonContext, Layout};
use crate::exec::RestartCoordinator;
use crate::kernel::daemon::{Daemonizer, HostDaemonizer};
use crate::kernel::lease::{
    AccessMode, CapabilityJournal, HostBackend, PrivilegeBackend, RuntimeLease, Sequencer, Startup,
};
use crate::kernel::signal::ProcessFlags;
use crate::observability::{LogSink, PrimaryLog, ScanLog};
use crate::utils::pidfile::PidFile;
use log::{debug, info};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::path::Path;
use std::sync::Arc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Bootstrap {
    layout: Layout,
    name: String,
    debug_level: u32,
    backend: Box<dyn PrivilegeBackend>,
    daemonizer: Box<dyn Daemonizer>,
    config: Box<dyn ConfigSource>,
    log: Arc<dyn LogSink>,
    scanlog: Arc<dyn LogSink>,
}

/// Result of a completed startup sequence.
pub struct Bootstrapped {
    pub context: DaemonContext,
    pub lease: RuntimeLease,
    pub log: Arc<dyn LogSink>,
    /// False in debug mode, where records stay on the console.
    pub log_file_backed: bool,
    pub scanlog: Arc<dyn LogSink>,
}

impl Bootstrap {
    pub fn new(layout: Layout, name: impl Into<String>, debug_level: u32) -> Self {
        Self {
            layout,
            name: name.into(),
            debug_level,
            backend: Box::new(HostBackend::new()),
            daemonizer: Box::new(HostDaemonizer),
            config: Box::new(JsonConfig),
            log: PrimaryLog::shared(),
            scanlog: Arc::new(ScanLog::new()),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn PrivilegeBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_daemonizer(mut self, daemonizer: Box<dyn Daemonizer>) -> Self {
        self.daemonizer = daemonizer;
        self
    }

    pub fn with_config_source(mut self, config: Box<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_scanlog(mut self, scanlog: Arc<dyn LogSink>) -> Self {
        self.scanlog = scanlog;
        self
    }

    pub fn run(self) -> Result<Bootstrapped> {
        let Bootstrap {
            layout,
            name,
            debug_level,
            backend,
            mut daemonizer,
            config,
            log,
            scanlog,
        } = self;

        let mut seq = Sequencer::<Startup>::new(backend).request_startup_lease()?;
        raise_core_limit();

        let mut context = DaemonContext::startup(&layout, &name, debug_level);

        seq.grant(&layout.prefix, AccessMode::Read)?;
        nix::unistd::chdir(&layout.prefix).map_err(|e| {
            SupervisorError::Filesystem(format!("chdir({}): {}", layout.prefix.display(), e))
        })?;

        if context.is_foreground() {
            info!("MAIN -> Debug level {}", debug_level);
        } else {
            daemonizer.detach()?;
            context = context.detached();

            seq.grant(context.log_path(), AccessMode::WriteCreate)?;
            open_granted(seq.journal(), log.as_ref(), context.log_path())?;
        }

        info!("MAIN -> {} {} started.", name, VERSION);
        info!("MAIN -> Reading configuration file...");

        seq.grant(context.config_path(), AccessMode::Read)?;
        seq.require(context.config_path(), AccessMode::Read)?;
        let options = config.load(context.config_path())?;
        let context = context.configured(&options);

        let mut seq = seq.configuration_loaded();

        if let Some(path) = context.scanlog() {
            seq.grant(path, AccessMode::WriteCreate)?;
            open_granted(seq.journal(), scanlog.as_ref(), path)?;
        }

        seq.grant(context.pidfile(), AccessMode::WriteCreate)?;
        seq.require(context.pidfile(), AccessMode::WriteCreate)?;
        let pidfile = PidFile::create(context.pidfile());

        seq.grant(&layout.binary, AccessMode::Execute)?;

        let lease = seq.narrow()?;

        pidfile?.write(context.pid())?;
        debug!(
            "MAIN -> Wrote pid {} to {}",
            context.pid(),
            context.pidfile().display()
        );

        Ok(Bootstrapped {
            context,
            lease,
            log,
            log_file_backed: debug_level == 0,
            scanlog,
        })
    }
}

impl Bootstrapped {
    /// Hand the bootstrap products to the lifecycle loop.
    pub fn into_supervisor<'f>(
        self,
        flags: &'f ProcessFlags,
        restart: RestartCoordinator,
    ) -> Supervisor<'f> {
        Supervisor::new(self.context, self.lease, flags, restart)
            .with_primary_log(self.log, self.log_file_backed)
            .with_scanlog(self.scanlog)
    }
}

fn open_granted(journal: &CapabilityJournal, sink: &dyn LogSink, path: &Path) -> Result<()> {
    journal.require(path, AccessMode::WriteCreate)?;
    sink.open(path)
}

/// Raise the soft core-dump limit to the hard limit. Best effort.
fn raise_core_limit() {
    match getrlimit(Resource::RLIMIT_CORE) {
        Ok((_soft, hard)) => {
            if let Err(e) = setrlimit(Resource::RLIMIT_CORE, hard, hard) {
                debug!("MAIN -> Could not raise RLIMIT_CORE: {}", e);
            }
        }
        Err(e) => debug!("MAIN -> Could not read RLIMIT_CORE: {}", e),
    }
}
