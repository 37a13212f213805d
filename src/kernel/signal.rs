//! Async-safe signal bridge.
//!
//! Handlers only store into [`ProcessFlags`] (and re-arm the one-second
//! alarm). Everything heavier runs in the lifecycle loop.
//!
//! The interrupt handler is the one narrow exception: it writes a fixed
//! farewell line with `write(2)` and calls `_exit(0)`. Do not add other
//! handler-side work.

use crate::config::types::{Result, SupervisorError};
use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sticky flags written from signal context and consumed by the loop.
///
/// Each flag is a plain boolean: repeated deliveries before the loop looks
/// coalesce into a single action.
#[derive(Debug)]
pub struct ProcessFlags {
    alarmed: AtomicBool,
    restart: AtomicBool,
    reopen: AtomicBool,
}

impl ProcessFlags {
    pub const fn new() -> Self {
        Self {
            alarmed: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            reopen: AtomicBool::new(false),
        }
    }

    /// Map a delivered signal number to its flag. Async-signal-safe.
    pub fn dispatch(&self, signum: libc::c_int) {
        match signum {
            libc::SIGALRM => self.alarmed.store(true, Ordering::SeqCst),
            libc::SIGHUP => self.restart.store(true, Ordering::SeqCst),
            libc::SIGUSR1 => self.reopen.store(true, Ordering::SeqCst),
            _ => {}
        }
    }

    /// Ask for an in-place restart on the next loop iteration.
    ///
    /// Used by engines that need a clean restart (operator kill, fatal
    /// connection state) in addition to SIGHUP.
    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    pub fn reopen_requested(&self) -> bool {
        self.reopen.load(Ordering::SeqCst)
    }

    pub fn alarmed(&self) -> bool {
        self.alarmed.load(Ordering::SeqCst)
    }

    // The take_* methods belong to the lifecycle loop: they observe and
    // clear in one step so a delivery racing with the action is kept.

    pub(crate) fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_reopen(&self) -> bool {
        self.reopen.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_alarm(&self) -> bool {
        self.alarmed.swap(false, Ordering::SeqCst)
    }
}

impl Default for ProcessFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide flags the installed handlers write to.
pub static FLAGS: ProcessFlags = ProcessFlags::new();

const INTERRUPT_LINE: &[u8] = b"MAIN -> Caught SIGINT, bye!\n";

extern "C" fn on_signal(signum: libc::c_int) {
    FLAGS.dispatch(signum);
    if signum == libc::SIGALRM {
        // SAFETY: alarm(2) is async-signal-safe.
        unsafe {
            libc::alarm(1);
        }
    }
}

extern "C" fn on_interrupt(_signum: libc::c_int) {
    crate::observability::logging::write_raw(INTERRUPT_LINE);
    // SAFETY: _exit(2) is async-signal-safe and skips atexit handlers.
    unsafe { libc::_exit(0) }
}

/// Installed signal bridge
pub struct SignalBridge;

impl SignalBridge {
    /// Install handlers for SIGALRM, SIGINT, SIGHUP and SIGUSR1, ignore
    /// SIGPIPE, and arm the first one-second alarm.
    pub fn install() -> Result<Self> {
        let alarm_action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let flag_action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let interrupt_action = SigAction::new(
            SigHandler::Handler(on_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );

        // SAFETY: every handler only touches atomics or async-signal-safe calls.
        unsafe {
            install_one(Signal::SIGALRM, &alarm_action)?;
            install_one(Signal::SIGINT, &interrupt_action)?;
            install_one(Signal::SIGHUP, &flag_action)?;
            install_one(Signal::SIGUSR1, &flag_action)?;

            signal::signal(Signal::SIGPIPE, SigHandler::SigIgn).map_err(|e| {
                SupervisorError::Process(format!("Failed to ignore SIGPIPE: {}", e))
            })?;
        }

        nix::unistd::alarm::set(1);

        info!("Signal handlers installed (SIGALRM, SIGINT, SIGHUP, SIGUSR1)");
        Ok(Self)
    }

    pub fn flags(&self) -> &'static ProcessFlags {
        &FLAGS
    }
}

unsafe fn install_one(sig: Signal, action: &SigAction) -> Result<()> {
    signal::sigaction(sig, action)
        .map(|_| ())
        .map_err(|e| SupervisorError::Process(format!("Failed to install {:?} handler: {}", sig, e)))
}
