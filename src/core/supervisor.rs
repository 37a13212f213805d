//! Lifecycle loop.
//!
//! One implicit "running" state. Every iteration, in this order:
//! 1. protocol engine `cycle()`, then scan engine `cycle()`
//! 2. restart request: abort in debug mode, otherwise re-exec
//! 3. reopen request: close and reopen the log sinks
//! 4. alarm: every one-second timer, once
//!
//! The loop itself never sleeps; pacing comes from the engines.

use crate::core::engine::{Engine, IdleEngine, PendingCommands, SharedCommands};
use crate::core::types::DaemonContext;
use crate::exec::{RestartCoordinator, RestartFailure};
use crate::kernel::lease::{AccessMode, RuntimeLease};
use crate::kernel::signal::ProcessFlags;
use crate::observability::{LogSink, PrimaryLog};
use log::{debug, error, info, warn};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Why the lifecycle loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Restart requested while running in debug mode
    DebugRestart,
    /// The descriptor limit could not be read, restart abandoned
    LimitQueryFailed,
    /// Re-exec failed after descriptor hygiene
    ExecFailed,
}

impl LoopExit {
    pub fn exit_code(self) -> i32 {
        match self {
            LoopExit::DebugRestart => 1,
            LoopExit::LimitQueryFailed => 1,
            LoopExit::ExecFailed => 0,
        }
    }
}

pub struct Supervisor<'f> {
    context: DaemonContext,
    lease: RuntimeLease,
    flags: &'f ProcessFlags,
    restart: RestartCoordinator,
    protocol: Box<dyn Engine>,
    scanner: Box<dyn Engine>,
    commands: SharedCommands,
    log: Arc<dyn LogSink>,
    log_file_backed: bool,
    scanlog: Option<Arc<dyn LogSink>>,
}

impl<'f> Supervisor<'f> {
    pub fn new(
        context: DaemonContext,
        lease: RuntimeLease,
        flags: &'f ProcessFlags,
        restart: RestartCoordinator,
    ) -> Self {
        let commands = PendingCommands::shared(context.command_timeout());
        let log_file_backed = !context.is_foreground();

        Self {
            context,
            lease,
            flags,
            restart,
            protocol: Box::new(IdleEngine::new("IRC")),
            scanner: Box::new(IdleEngine::new("SCAN")),
            commands,
            log: PrimaryLog::shared(),
            log_file_backed,
            scanlog: None,
        }
    }

    pub fn with_engines(mut self, protocol: Box<dyn Engine>, scanner: Box<dyn Engine>) -> Self {
        self.protocol = protocol;
        self.scanner = scanner;
        self
    }

    /// Primary log sink. Only a file-backed log is reopened on rotation.
    pub fn with_primary_log(mut self, log: Arc<dyn LogSink>, file_backed: bool) -> Self {
        self.log = log;
        self.log_file_backed = file_backed;
        self
    }

    /// Scan log sink, reopened only when the context names a scan log path.
    pub fn with_scanlog(mut self, scanlog: Arc<dyn LogSink>) -> Self {
        self.scanlog = Some(scanlog);
        self
    }

    pub fn with_commands(mut self, commands: SharedCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Run until a terminal restart outcome. Interrupts never return here.
    pub fn run(&mut self) -> LoopExit {
        debug!(
            "MAIN -> Entering main loop ({} / {})",
            self.protocol.name(),
            self.scanner.name()
        );
        loop {
            if let ControlFlow::Break(exit) = self.step() {
                return exit;
            }
        }
    }

    /// One loop iteration.
    pub fn step(&mut self) -> ControlFlow<LoopExit> {
        self.protocol.cycle();
        self.scanner.cycle();

        if self.flags.take_restart() {
            return ControlFlow::Break(self.restart());
        }

        if self.flags.take_reopen() {
            self.reopen_logs();
        }

        if self.flags.take_alarm() {
            self.second_elapsed();
        }

        ControlFlow::Continue(())
    }

    fn restart(&self) -> LoopExit {
        if self.context.is_foreground() {
            info!("MAIN -> Restart requested in debug mode, exiting");
            return LoopExit::DebugRestart;
        }

        info!("MAIN -> Restarting process");

        match self.restart.restart(&self.lease) {
            RestartFailure::LimitQuery(e) => {
                error!("MAIN RESTART -> {}", e);
                LoopExit::LimitQueryFailed
            }
            RestartFailure::Exec(e) => {
                error!(
                    "MAIN RESTART -> Execution of \"{}\" failed. ERROR: {}",
                    self.restart.target().display(),
                    e
                );
                LoopExit::ExecFailed
            }
        }
    }

    fn reopen_logs(&self) {
        info!("MAIN -> Caught SIGUSR1, reopening logfiles");

        if self.log_file_backed {
            self.reopen(self.log.as_ref(), self.context.log_path());
        }

        if let (Some(path), Some(scanlog)) = (self.context.scanlog(), self.scanlog.as_ref()) {
            self.reopen(scanlog.as_ref(), path);
        }

        info!("MAIN -> reopened logfiles");
    }

    fn reopen(&self, sink: &dyn LogSink, path: &Path) {
        if let Err(e) = self.lease.require(path, AccessMode::WriteCreate) {
            error!("MAIN -> Not reopening {}: {}", sink.name(), e);
            return;
        }

        sink.close();
        if let Err(e) = sink.open(path) {
            warn!("MAIN -> Failed to reopen {} {}: {}", sink.name(), path.display(), e);
        }
    }

    fn second_elapsed(&mut self) {
        self.protocol.timer();
        self.scanner.timer();

        let now = Instant::now();
        match self.commands.lock() {
            Ok(mut commands) => {
                commands.sweep(now);
            }
            Err(poisoned) => {
                poisoned.into_inner().sweep(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Options;
    use crate::core::types::Layout;
    use crate::exec::Invocation;
    use crate::kernel::lease::{Sequencer, Startup};
    use crate::testing::{EventLog, FakeImage, RecordingBackend, RecordingEngine, RecordingSink};
    use std::path::PathBuf;
    use std::time::Duration;

    const BINARY: &str = "/opt/opmon/bin/opmon";

    struct Harness {
        events: EventLog,
        flags: ProcessFlags,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                events: EventLog::default(),
                flags: ProcessFlags::new(),
            }
        }

        fn supervisor(&self, debug_level: u32, options: &Options) -> Supervisor<'_> {
            let layout = Layout::rooted("/opt/opmon");
            let context = DaemonContext::new(&layout, "irc", debug_level, options);

            let mut seq = Sequencer::<Startup>::new(Box::new(RecordingBackend::default()))
                .request_startup_lease()
                .unwrap();
            seq.grant(context.log_path(), AccessMode::WriteCreate).unwrap();
            let mut seq = seq.configuration_loaded();
            if let Some(scanlog) = context.scanlog() {
                seq.grant(scanlog, AccessMode::WriteCreate).unwrap();
            }
            seq.grant(context.pidfile(), AccessMode::WriteCreate).unwrap();
            seq.grant(Path::new(BINARY), AccessMode::Execute).unwrap();
            let lease = seq.narrow().unwrap();

            let restart = RestartCoordinator::new(
                PathBuf::from(BINARY),
                Invocation::from_args(["opmon", "-c", "irc"]).unwrap(),
                Box::new(FakeImage::new(self.events.clone()).with_limit(3)),
            );

            Supervisor::new(context, lease, &self.flags, restart)
                .with_engines(
                    Box::new(RecordingEngine::new("irc", self.events.clone())),
                    Box::new(RecordingEngine::new("scan", self.events.clone())),
                )
                .with_primary_log(
                    Arc::new(RecordingSink::new("log", self.events.clone())),
                    debug_level == 0,
                )
                .with_scanlog(Arc::new(RecordingSink::new("scanlog", self.events.clone())))
        }
    }

    fn options() -> Options {
        Options::new("/run/opmon.pid")
    }

    #[test]
    fn quiet_iteration_only_cycles_engines() {
        let h = Harness::new();
        let mut sup = h.supervisor(0, &options());

        assert_eq!(sup.step(), ControlFlow::Continue(()));
        assert_eq!(h.events.snapshot(), vec!["irc cycle", "scan cycle"]);
    }

    #[test]
    fn debug_restart_exits_nonzero_without_exec() {
        let h = Harness::new();
        let mut sup = h.supervisor(1, &options());
        h.flags.dispatch(libc::SIGHUP);

        let exit = match sup.step() {
            ControlFlow::Break(exit) => exit,
            ControlFlow::Continue(()) => panic!("restart ignored"),
        };
        assert_eq!(exit, LoopExit::DebugRestart);
        assert_eq!(exit.exit_code(), 1);
        assert!(h.events.position("cloexec").is_none());
        assert!(h.events.position("exec").is_none());
    }

    #[test]
    fn restart_marks_descriptors_before_exec() {
        let h = Harness::new();
        let mut sup = h.supervisor(0, &options());
        h.flags.dispatch(libc::SIGHUP);
        h.flags.dispatch(libc::SIGHUP);

        assert_eq!(sup.step(), ControlFlow::Break(LoopExit::ExecFailed));
        assert_eq!(LoopExit::ExecFailed.exit_code(), 0);
        assert_eq!(
            h.events.snapshot(),
            vec![
                "irc cycle",
                "scan cycle",
                "cloexec 0",
                "cloexec 1",
                "cloexec 2",
                "exec /opt/opmon/bin/opmon opmon -c irc",
            ]
        );
    }

    #[test]
    fn restart_takes_priority_over_reopen_and_alarm() {
        let h = Harness::new();
        let mut sup = h.supervisor(1, &options());
        h.flags.dispatch(libc::SIGALRM);
        h.flags.dispatch(libc::SIGUSR1);
        h.flags.dispatch(libc::SIGHUP);

        assert!(sup.step().is_break());
        assert!(h.events.position("irc timer").is_none());
        assert!(h.events.position("close").is_none());
    }

    #[test]
    fn reopen_cycles_both_logs_and_clears_flag() {
        let h = Harness::new();
        let opts = options().with_scanlog("/opt/opmon/var/log/scan.log");
        let mut sup = h.supervisor(0, &opts);
        h.flags.dispatch(libc::SIGUSR1);
        h.flags.dispatch(libc::SIGUSR1);

        assert!(sup.step().is_continue());
        assert_eq!(
            h.events.snapshot(),
            vec![
                "irc cycle",
                "scan cycle",
                "close log",
                "open log /opt/opmon/var/log/irc.log",
                "close scanlog",
                "open scanlog /opt/opmon/var/log/scan.log",
            ]
        );
        assert!(!h.flags.reopen_requested());

        h.events.clear();
        assert!(sup.step().is_continue());
        assert_eq!(h.events.snapshot(), vec!["irc cycle", "scan cycle"]);
    }

    #[test]
    fn reopen_without_scanlog_leaves_it_alone() {
        let h = Harness::new();
        let mut sup = h.supervisor(0, &options());
        h.flags.dispatch(libc::SIGUSR1);

        assert!(sup.step().is_continue());
        let events = h.events.snapshot();
        assert!(events.contains(&"open log /opt/opmon/var/log/irc.log".to_string()));
        assert!(!events.iter().any(|e| e.contains("scanlog")));
    }

    #[test]
    fn foreground_reopen_skips_console_log() {
        let h = Harness::new();
        let opts = options().with_scanlog("/opt/opmon/var/log/scan.log");
        let mut sup = h.supervisor(2, &opts);
        h.flags.dispatch(libc::SIGUSR1);

        assert!(sup.step().is_continue());
        let events = h.events.snapshot();
        assert!(!events.iter().any(|e| e.ends_with(" log") || e.starts_with("open log")));
        assert!(events.contains(&"open scanlog /opt/opmon/var/log/scan.log".to_string()));
    }

    #[test]
    fn alarm_runs_each_timer_once() {
        let h = Harness::new();
        let commands = PendingCommands::shared(Duration::ZERO);
        let mut sup = h.supervisor(0, &options()).with_commands(commands.clone());
        commands.lock().unwrap().push("#opers", Instant::now());
        std::thread::sleep(Duration::from_millis(2));
        h.flags.dispatch(libc::SIGALRM);
        h.flags.dispatch(libc::SIGALRM);

        assert!(sup.step().is_continue());
        assert_eq!(
            h.events.snapshot(),
            vec!["irc cycle", "scan cycle", "irc timer", "scan timer"]
        );
        assert!(commands.lock().unwrap().is_empty());
        assert!(!h.flags.alarmed());
    }
}
